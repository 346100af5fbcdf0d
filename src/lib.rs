//! Stage, parameterise, submit and track batches of WRF-Hydro simulation jobs
//!
//! A batch is a list of [`job::Job`]s. Each job copies a template run directory, rewrites the
//! model parameter files inside it, and is handed to an external batch scheduler (PBS or Slurm).
//! [`schedule::Scheduler`] keeps a bounded number of jobs in flight and polls them until
//! they finish.

/// Simulation configuration read from YAML
pub mod config;
/// Which external batch scheduler is driving the cluster
pub mod flavour;
/// Parameter registry and the parameter adjustment engine
pub mod params;
/// Submit and query commands for the external batch scheduler
pub mod batch;
/// One simulation job and its lifecycle
pub mod job;
/// Bounded-concurrency batch scheduling
pub mod schedule;
/// Stage transitions are recorded in a SQLite database
pub mod db;
