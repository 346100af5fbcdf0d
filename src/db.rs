//! Stage transitions are recorded in a SQLite database
//!
//! The ledger is a side record for operators: the scheduler writes every job's history to it and
//! carries on if a write fails.

/// Connect to a SQLite database
pub mod open;
/// Write and read job stage histories
pub mod stage;

pub use open::open_db;
pub use stage::{load_stages, record_history};
