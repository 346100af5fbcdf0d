use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flavour::SchedulerFlavour;

/// Subdirectory of the run source holding the pristine parameter files
pub static PARAMS_FILES_DIR: &str = "params_files";
/// Subdirectory of a job directory receiving the gridded parameter files
pub static DOMAIN_DIR: &str = "DOMAIN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("can't create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a batch needs to know about the filesystem and the cluster
///
/// Relative directories are resolved against `root_dir`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub root_dir: PathBuf,
    #[serde(default = "default_run_source_dir")]
    pub run_source_dir: PathBuf,
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_params_yaml")]
    pub params_yaml: PathBuf,
    /// SQLite stage ledger, disabled when absent
    #[serde(default)]
    pub ledger: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub job: JobSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub flavour: SchedulerFlavour,
    #[serde(default)]
    pub submit_template: Option<String>,
    #[serde(default)]
    pub query_template: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// consecutive unrecognised status tokens before a job is failed, never when absent
    #[serde(default)]
    pub unknown_status_limit: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            flavour: SchedulerFlavour::default(),
            submit_template: None,
            query_template: None,
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent: default_max_concurrent(),
            unknown_status_limit: None,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Per-job file names inside the job directory
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobSettings {
    #[serde(default = "default_submit_script")]
    pub submit_script: String,
    #[serde(default = "default_result_artifact")]
    pub result_artifact: String,
}

impl Default for JobSettings {
    fn default() -> JobSettings {
        JobSettings {
            submit_script: default_submit_script(),
            result_artifact: default_result_artifact(),
        }
    }
}

/// Absolute directories shared by every job of a batch
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunLayout {
    pub root_dir: PathBuf,
    pub run_source_dir: PathBuf,
    pub run_dir: PathBuf,
    pub result_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl RunLayout {
    /// Template run directory of one event
    pub fn raw_run_dir(&self, event_no: &str) -> PathBuf {
        self.run_source_dir.join(event_no)
    }

    pub fn params_dir(&self) -> PathBuf {
        self.run_source_dir.join(PARAMS_FILES_DIR)
    }
}

fn default_run_source_dir() -> PathBuf {
    PathBuf::from("run_source")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("run")
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("result")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("configs")
}

fn default_params_yaml() -> PathBuf {
    PathBuf::from("params/run_params.yaml")
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_concurrent() -> usize {
    5
}

fn default_submit_script() -> String {
    "Hydrojob.pbs".to_string()
}

fn default_result_artifact() -> String {
    "frxst_pts_out.txt".to_string()
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<SimulationConfig, ConfigError> {
        info!("Reading simulation configuration at {}", path.display());
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        SimulationConfig::from_yaml_str(&yaml)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<SimulationConfig, ConfigError> {
        let config: SimulationConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid("scheduler.max_concurrent must be at least 1".into()));
        }
        if self.job.submit_script.trim().is_empty() {
            return Err(ConfigError::Invalid("job.submit_script must not be empty".into()));
        }
        if self.job.result_artifact.trim().is_empty() {
            return Err(ConfigError::Invalid("job.result_artifact must not be empty".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> RunLayout {
        RunLayout {
            root_dir: self.root_dir.clone(),
            run_source_dir: self.root_dir.join(&self.run_source_dir),
            run_dir: self.root_dir.join(&self.run_dir),
            result_dir: self.root_dir.join(&self.result_dir),
            config_dir: self.root_dir.join(&self.config_dir),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root_dir.join(&self.params_yaml)
    }

    pub fn ledger_path(&self) -> Option<PathBuf> {
        self.ledger.as_ref().map(|path| self.root_dir.join(path))
    }

    /// Create the run, result and config directories if they don't exist yet
    pub fn create_work_dirs(&self) -> Result<(), ConfigError> {
        let layout = self.layout();
        for dir in [&layout.run_dir, &layout.result_dir, &layout.config_dir] {
            if dir.exists() {
                debug!("Directory exists: {}", dir.display());
                continue;
            }
            info!("Directory {} does not exist. Creating...", dir.display());
            fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = SimulationConfig::from_yaml_str("root_dir: /data/central_sample\n").unwrap();
        let layout = config.layout();
        assert_eq!(layout.run_dir, PathBuf::from("/data/central_sample/run"));
        assert_eq!(layout.raw_run_dir("Fuping_20190804"), PathBuf::from("/data/central_sample/run_source/Fuping_20190804"));
        assert_eq!(config.registry_path(), PathBuf::from("/data/central_sample/params/run_params.yaml"));
        assert_eq!(config.scheduler.max_concurrent, 5);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.scheduler.flavour, SchedulerFlavour::Pbs);
        assert_eq!(config.job.submit_script, "Hydrojob.pbs");
        assert_eq!(config.ledger_path(), None);
    }

    #[test]
    fn scheduler_section_is_read() {
        let yaml = "root_dir: /data\nledger: hydrorun.db\nscheduler:\n  flavour: slurm\n  max_concurrent: 2\n  poll_interval_secs: 30\n  unknown_status_limit: 12\n";
        let config = SimulationConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.scheduler.flavour, SchedulerFlavour::Slurm);
        assert_eq!(config.scheduler.max_concurrent, 2);
        assert_eq!(config.scheduler.unknown_status_limit, Some(12));
        assert_eq!(config.ledger_path(), Some(PathBuf::from("/data/hydrorun.db")));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let yaml = "root_dir: /data\nscheduler:\n  max_concurrent: 0\n";
        assert!(matches!(SimulationConfig::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn work_dirs_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("root_dir: {}\n", dir.path().display());
        let config = SimulationConfig::from_yaml_str(&yaml).unwrap();
        config.create_work_dirs().unwrap();
        let layout = config.layout();
        assert!(layout.run_dir.is_dir());
        assert!(layout.result_dir.is_dir());
        assert!(layout.config_dir.is_dir());
    }
}
