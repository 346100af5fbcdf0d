//! One simulation job and its lifecycle
//!
//! A [`Job`] moves strictly forward through
//! `Created → Staged → Parameterized → Submitted → Running → Completed | Failed`.
//! Every fatal error before submission writes a snapshot of the job to the config directory
//! before it is returned, so a failed job can be inspected or re-run without guessing.

use std::path::PathBuf;

use thiserror::Error;

use crate::batch::BatchError;
use crate::params::ParamError;

/// Job stages and the allowed transitions between them
pub mod stage;
/// Job lists read from YAML
pub mod request;
/// Job directory allocation and template copying
pub mod workdir;
/// The job entity and its stage operations
pub mod lifecycle;
/// Persisted job state for debugging and re-runs
pub mod snapshot;

pub use lifecycle::Job;
pub use request::{JobRequest, Period};
pub use snapshot::JobSnapshot;
pub use stage::{JobStage, StageRecord};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("template run directory {} does not exist", .0.display())]
    MissingSource(PathBuf),
    #[error("no free job directory next to {} after {attempts} attempts", base.display())]
    DirectoryCollision { base: PathBuf, attempts: usize },
    #[error("failed to stage job directory {}: {source}", job_dir.display())]
    Staging {
        job_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parameter {0} not found in the parameter registry")]
    UnknownParameter(String),
    #[error("model parameters initialisation failed: {0}")]
    Parameterization(#[source] ParamError),
    #[error("submission failed: {0}")]
    Submission(#[source] BatchError),
    #[error("status query failed: {0}")]
    Poll(#[source] BatchError),
    #[error("can't collect result into {}: {source}", path.display())]
    Collection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job {job_id} can't move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStage,
        to: JobStage,
    },
    #[error("job {0} has not been staged")]
    NotStaged(String),
    #[error("job {0} has not been submitted")]
    NotSubmitted(String),
    #[error("parameters of job {0} can't change after parameterisation")]
    ParamsFrozen(String),
    #[error(transparent)]
    Snapshot(#[from] snapshot::SnapshotError),
}
