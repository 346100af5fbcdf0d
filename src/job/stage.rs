use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job is in its lifecycle
///
/// Stages are ordered. A job only ever moves to the stage directly after its current one, except
/// that `Running` may end in either `Completed` or `Failed`. `Submitted` and `Running` are one
/// tracked state as far as the scheduler is concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Created,
    Staged,
    Parameterized,
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobStage {
    /// db and snapshot spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Created => "created",
            JobStage::Staged => "staged",
            JobStage::Parameterized => "parameterized",
            JobStage::Submitted => "submitted",
            JobStage::Running => "running",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    pub fn can_advance_to(&self, next: JobStage) -> bool {
        matches!(
            (self, next),
            (JobStage::Created, JobStage::Staged)
                | (JobStage::Staged, JobStage::Parameterized)
                | (JobStage::Parameterized, JobStage::Submitted)
                | (JobStage::Submitted, JobStage::Running)
                | (JobStage::Running, JobStage::Completed)
                | (JobStage::Running, JobStage::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    /// The scheduler has handed out a handle for this job
    pub fn is_submitted(&self) -> bool {
        *self >= JobStage::Submitted
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<JobStage, String> {
        match s {
            "created" => Ok(JobStage::Created),
            "staged" => Ok(JobStage::Staged),
            "parameterized" => Ok(JobStage::Parameterized),
            "submitted" => Ok(JobStage::Submitted),
            "running" => Ok(JobStage::Running),
            "completed" => Ok(JobStage::Completed),
            "failed" => Ok(JobStage::Failed),
            other => Err(format!("unknown job stage {:?}", other)),
        }
    }
}

/// One entry of a job's stage history
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StageRecord {
    pub stage: JobStage,
    pub at: DateTime<Utc>,
}

impl StageRecord {
    pub fn now(stage: JobStage) -> StageRecord {
        StageRecord { stage, at: Utc::now() }
    }
}
