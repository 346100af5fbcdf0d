//! Bounded-concurrency batch scheduling
//!
//! A single control loop launches jobs in order, never keeps more than `max_concurrent` of them
//! with the batch scheduler, and polls the ones in flight until they finish. Nothing runs in
//! parallel on this side: every pause blocks the loop.

/// Batch-scoped waiting/running/finished bookkeeping
pub mod set;
/// Waiting between scheduler rounds
pub mod pause;
/// The control loop
pub mod run;

pub use pause::{Pause, ThreadSleep};
pub use run::{BatchReport, ScheduleError, ScheduleOptions, Scheduler};
pub use set::ScheduleSet;
