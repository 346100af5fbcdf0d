use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::params::adjust::{Adjust, ParameterSpec};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("can't read parameter registry {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parameter registry is not valid YAML")]
    Parse(#[from] serde_yaml::Error),
    #[error("registry schema can't be compiled: {0}")]
    Schema(String),
    #[error("parameter registry fails validation: {0}")]
    Invalid(String),
    #[error("can't deserialise parameter registry")]
    Deserialise(#[from] serde_json::Error),
    #[error("parameter {0} lists a different number of names and files")]
    Misaligned(String),
}

/// A single name or a list of names, both spellings appear in registry files
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// A registry row as written in YAML
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryRow {
    name: OneOrMany,
    file: OneOrMany,
    adjust: Adjust,
    min_value: Option<f64>,
    max_value: Option<f64>,
    ini_value: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

/// A validated registry row
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryParameter {
    pub spec: ParameterSpec,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub ini_value: Option<f64>,
    pub description: Option<String>,
}

impl RegistryParameter {
    pub fn in_range(&self, value: f64) -> bool {
        self.min_value.map_or(true, |min| value >= min) && self.max_value.map_or(true, |max| value <= max)
    }
}

/// Read-only catalog of gridded parameters, loaded once per batch
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    parameters: BTreeMap<String, RegistryParameter>,
}

impl ParameterRegistry {
    pub fn load(path: &Path) -> Result<ParameterRegistry, RegistryError> {
        info!("Reading parameter registry at {}", path.display());
        let yaml = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = ParameterRegistry::from_yaml_str(&yaml)?;
        info!("Parameter registry loaded from {} ({} parameters)", path.display(), registry.len());
        Ok(registry)
    }

    /// Parse untyped, validate against the registry schema, then deserialise into typed rows
    pub fn from_yaml_str(yaml: &str) -> Result<ParameterRegistry, RegistryError> {
        let json: Value = serde_yaml::from_str(yaml)?;
        validate(&json)?;
        let rows = serde_json::from_value::<BTreeMap<String, RegistryRow>>(json)?;

        let mut parameters = BTreeMap::new();
        for (key, row) in rows {
            let spec = ParameterSpec::new(row.name.into_vec(), row.file.into_vec(), row.adjust)
                .ok_or_else(|| RegistryError::Misaligned(key.clone()))?;
            let parameter = RegistryParameter {
                spec,
                min_value: row.min_value,
                max_value: row.max_value,
                ini_value: row.ini_value,
                description: row.description,
            };
            parameters.insert(key, parameter);
        }
        Ok(ParameterRegistry { parameters })
    }

    pub fn get(&self, key: &str) -> Option<&RegistryParameter> {
        self.parameters.get(key)
    }

    /// Look up the spec for a key, warning when the value falls outside the registered range
    pub fn resolve(&self, key: &str, value: f64) -> Option<&ParameterSpec> {
        let parameter = self.parameters.get(key)?;
        if !parameter.in_range(value) {
            warn!(
                "Value {} for {} is outside the registered range [{:?}, {:?}]",
                value, key, parameter.min_value, parameter.max_value
            );
        }
        Some(&parameter.spec)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

fn validate(json: &Value) -> Result<(), RegistryError> {
    /// included registry schema
    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/registry.json"));
    info!("Validating parameter registry against JSON schema");
    let schema: Value = serde_json::from_str(SCHEMA)?;
    let compiled = JSONSchema::compile(&schema).map_err(|err| RegistryError::Schema(err.to_string()))?;

    let result = match compiled.validate(json) {
        Ok(_) => Ok(()),
        Err(errors) => {
            let messages: Vec<String> = errors.map(|err| err.to_string()).collect();
            warn!("Parameter registry fails validation");
            Err(RegistryError::Invalid(messages.join("; ")))
        }
    };
    result
}
