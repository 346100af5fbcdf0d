use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("can't read job list {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job list {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("job list must map job ids to jobs")]
    NotAMapping,
    #[error("job id {0:?} is not a string or number")]
    BadJobId(serde_yaml::Value),
    #[error("job id {0} appears more than once")]
    Duplicate(String),
}

/// Simulation window; opaque to the runner
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Period {
    pub start: String,
    pub end: String,
}

/// What to run for one job id
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobRequest {
    #[serde(deserialize_with = "string_or_number")]
    pub event_no: String,
    #[serde(default)]
    pub period: Option<Period>,
    #[serde(default)]
    pub set_params: BTreeMap<String, f64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {:?}",
            other
        ))),
    }
}

/// Read a job list: an ordered mapping from job id to [`JobRequest`]
///
/// The order of the mapping is the submission order. A key written twice is a YAML parse
/// error; keys that only collide once numbers become strings (`1` and `'1'`) are reported as
/// [`RequestError::Duplicate`].
pub fn load_job_requests(path: &Path) -> Result<Vec<(String, JobRequest)>, RequestError> {
    info!("Reading job list at {}", path.display());
    let yaml = fs::read_to_string(path).map_err(|source| RequestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |source| RequestError::Parse { path: path.to_path_buf(), source };
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).map_err(parse_error)?;
    let mapping = match value {
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => return Err(RequestError::NotAMapping),
    };

    let mut seen = HashSet::new();
    let mut requests = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let job_id = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            other => return Err(RequestError::BadJobId(other)),
        };
        // distinct YAML keys can still name the same job id
        if !seen.insert(job_id.clone()) {
            return Err(RequestError::Duplicate(job_id));
        }
        let request: JobRequest = serde_yaml::from_value(value).map_err(parse_error)?;
        requests.push((job_id, request));
    }
    info!("Loaded {} job requests", requests.len());
    Ok(requests)
}
