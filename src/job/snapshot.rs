use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{JobSettings, RunLayout};
use crate::job::request::Period;
use crate::job::stage::{JobStage, StageRecord};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("can't access snapshot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot {} is not valid YAML: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Full state of a job at the moment it was saved
///
/// Written as YAML to `config_dir/{job_id}_{event_no}[_{tag}]_config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub event_no: String,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(flatten)]
    pub layout: RunLayout,
    pub raw_run_dir: PathBuf,
    #[serde(default)]
    pub set_params: BTreeMap<String, f64>,
    pub stage: JobStage,
    #[serde(default)]
    pub job_dir: Option<PathBuf>,
    #[serde(default)]
    pub external_handle: Option<String>,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub history: Vec<StageRecord>,
    #[serde(default)]
    pub settings: JobSettings,
    pub saved_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn file_name(job_id: &str, event_no: &str, tag: &str) -> String {
        match tag {
            "" => format!("{}_{}_config.yaml", job_id, event_no),
            tag => format!("{}_{}_{}_config.yaml", job_id, event_no, tag),
        }
    }

    pub fn save(&self, config_dir: &Path, tag: &str) -> Result<PathBuf, SnapshotError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| SnapshotError::Io { path, source }
        };
        fs::create_dir_all(config_dir).map_err(io_error(config_dir))?;

        let path = config_dir.join(JobSnapshot::file_name(&self.job_id, &self.event_no, tag));
        let yaml = serde_yaml::to_string(self).map_err(|source| SnapshotError::Yaml {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, yaml).map_err(io_error(&path))?;
        info!("Job {} configuration saved to {}", self.job_id, path.display());
        Ok(path)
    }

    /// Whether `path` is the tagged snapshot of a failed step rather than the final one
    fn is_tagged(&self, path: &Path) -> bool {
        let untagged = JobSnapshot::file_name(&self.job_id, &self.event_no, "");
        path.file_name().map_or(false, |name| name != untagged.as_str())
    }

    pub fn load(path: &Path) -> Result<JobSnapshot, SnapshotError> {
        let yaml = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&yaml).map_err(|source| SnapshotError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Snapshot files in a directory, sorted by name
pub fn get_snapshot_paths(dir: &Path) -> Result<Vec<PathBuf>, io::Error> {
    let mut paths = fs::read_dir(dir)?
        .map(|res| res.map(|e| e.path()))
        .collect::<Result<Vec<PathBuf>, io::Error>>()?;
    paths.retain(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.ends_with("_config.yaml"))
    });
    paths.sort();
    Ok(paths)
}

/// Pick the snapshot to resume for every job named in `paths`
///
/// The newest snapshot of each job wins, and a tagged failure snapshot beats the untagged
/// final one saved at the same moment. Jobs whose chosen snapshot is `Completed` are left
/// out. Jobs come back in the order their first snapshot appears in `paths`.
pub fn resumable_snapshots(paths: &[PathBuf]) -> Result<Vec<JobSnapshot>, SnapshotError> {
    let mut order: Vec<String> = Vec::new();
    let mut chosen: BTreeMap<String, (bool, JobSnapshot)> = BTreeMap::new();
    for path in paths {
        let snapshot = JobSnapshot::load(path)?;
        let tagged = snapshot.is_tagged(path);
        let replace = match chosen.get(&snapshot.job_id) {
            None => {
                order.push(snapshot.job_id.clone());
                true
            }
            Some((held_tagged, held)) => (snapshot.saved_at, tagged) > (held.saved_at, *held_tagged),
        };
        if replace {
            chosen.insert(snapshot.job_id.clone(), (tagged, snapshot));
        }
    }

    let mut snapshots = Vec::with_capacity(order.len());
    for job_id in order {
        if let Some((_, snapshot)) = chosen.remove(&job_id) {
            if snapshot.stage == JobStage::Completed {
                warn!("Job {} already completed, not resuming it", job_id);
                continue;
            }
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}
