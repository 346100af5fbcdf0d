use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// The batch scheduler installed on the cluster
///
/// The flavour decides the default submit and query command templates and how the query output
/// is parsed into a status token.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerFlavour {
    #[default]
    Pbs,
    Slurm,
}

impl SchedulerFlavour {
    pub fn submit_template(&self) -> &'static str {
        match self {
            SchedulerFlavour::Pbs => "qsub {script}",
            SchedulerFlavour::Slurm => "sbatch --parsable {script}",
        }
    }

    pub fn query_template(&self) -> &'static str {
        match self {
            SchedulerFlavour::Pbs => "qstat {handle}",
            SchedulerFlavour::Slurm => "sacct -n -X -P -j {handle} -o State",
        }
    }
}

impl fmt::Display for SchedulerFlavour {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerFlavour::Pbs => write!(f, "pbs"),
            SchedulerFlavour::Slurm => write!(f, "slurm"),
        }
    }
}
