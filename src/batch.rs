//! Submit and query commands for the external batch scheduler
//!
//! The cluster scheduler is only reached through two operations: submit a job script and get a
//! handle back, and query a handle for a status token. [`BatchScheduler`] is that contract;
//! [`command::CommandScheduler`] implements it by running `qsub`/`qstat` or
//! `sbatch`/`sacct` as child processes.

use std::path::Path;

use thiserror::Error;

/// Render and run scheduler commands
pub mod command;
/// Parse scheduler query output into a status
pub mod status;

pub use command::CommandScheduler;
pub use status::ExternalStatus;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("can't render command template {template:?}")]
    Template {
        template: String,
        #[source]
        source: tinytemplate::error::Error,
    },
    #[error("command template {0:?} renders to an empty command")]
    EmptyCommand(String),
    #[error("failed to run {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with status {code:?}: {stderr}")]
    Rejected {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected output from {command}: {output:?}")]
    MalformedOutput { command: String, output: String },
}

/// The submission/query contract of an external batch scheduler
pub trait BatchScheduler {
    /// Submit `script` with `job_dir` as working directory, returning the scheduler's handle
    fn submit(&self, script: &Path, job_dir: &Path) -> Result<String, BatchError>;

    /// Ask the scheduler for the current status of a submitted job
    fn query(&self, handle: &str) -> Result<ExternalStatus, BatchError>;
}
