use std::fmt;

use crate::flavour::SchedulerFlavour;

/// Job status as reported by the batch scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalStatus {
    /// queued or executing
    Running,
    Completed,
    Failed,
    /// a token we don't recognise; never treated as terminal
    Unknown(String),
}

impl ExternalStatus {
    /// Map a PBS `S` column token
    ///
    /// `C` is completed and `E` is treated as an error. `R` and `Q` are running or waiting.
    pub fn from_pbs_token(token: &str) -> ExternalStatus {
        match token {
            "C" => ExternalStatus::Completed,
            "E" => ExternalStatus::Failed,
            "R" | "Q" => ExternalStatus::Running,
            other => ExternalStatus::Unknown(other.to_string()),
        }
    }

    /// Map a Slurm `sacct` state such as `COMPLETED` or `CANCELLED by 1234`
    pub fn from_slurm_state(state: &str) -> ExternalStatus {
        let word = state.split_whitespace().next().unwrap_or("");
        match word.trim_end_matches('+') {
            "COMPLETED" => ExternalStatus::Completed,
            "RUNNING" | "PENDING" => ExternalStatus::Running,
            "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" | "DEADLINE"
            | "PREEMPTED" => ExternalStatus::Failed,
            _ => ExternalStatus::Unknown(word.to_string()),
        }
    }

    /// One-letter status token stored in job snapshots
    pub fn token(&self) -> &str {
        match self {
            ExternalStatus::Running => "R",
            ExternalStatus::Completed => "C",
            ExternalStatus::Failed => "E",
            ExternalStatus::Unknown(token) => token,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExternalStatus::Completed | ExternalStatus::Failed)
    }
}

impl fmt::Display for ExternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExternalStatus::Unknown(token) => write!(f, "unknown ({})", token),
            known => write!(f, "{}", known.token()),
        }
    }
}

/// Extract the status from query output, `None` if the output doesn't have the expected shape
///
/// PBS `qstat <id>` prints two header lines, then one line per job with the state in column 5.
/// Slurm `sacct -n -X -P -o State` prints the state on the first line.
pub fn parse_query_output(flavour: SchedulerFlavour, output: &str) -> Option<ExternalStatus> {
    match flavour {
        SchedulerFlavour::Pbs => {
            let job_line = output.lines().nth(2)?;
            let token = job_line.split_whitespace().nth(4)?;
            Some(ExternalStatus::from_pbs_token(token))
        }
        SchedulerFlavour::Slurm => {
            let state = output.lines().map(str::trim).find(|line| !line.is_empty())?;
            Some(ExternalStatus::from_slurm_state(state))
        }
    }
}
