use std::path::Path;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::params::grid::{extremes, load_grid_datasets, save_grid_datasets, GridDataset, GridSet};
use crate::params::{ParamError, PRECISION};

/// How a parameter value is applied to a variable
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjust {
    /// every cell is set to the value
    Replace,
    /// every cell is multiplied by the value
    Scale,
}

/// The variables one parameter key touches
///
/// `names[i]` lives in `files[i]`. The two lists always have the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    names: Vec<String>,
    files: Vec<String>,
    pub adjust: Adjust,
}

impl ParameterSpec {
    /// Returns `None` if names and files are not aligned
    pub fn new(names: Vec<String>, files: Vec<String>, adjust: Adjust) -> Option<ParameterSpec> {
        if names.len() != files.len() || names.is_empty() {
            return None;
        }
        Some(ParameterSpec { names, files, adjust })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// (variable, file) pairs
    pub fn targets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.files.iter().map(String::as_str))
    }
}

/// Replace or scale one variable and verify the new extremes
///
/// The new values are computed on a copy and only stored in `dataset` once verification passes.
/// For negative values the extremes swap places, so the post-mutation minimum is checked
/// against the expected maximum and the other way round.
pub fn adjust_value(
    variable: &str,
    dataset: &mut GridDataset,
    method: Adjust,
    value: f64,
) -> Result<(), ParamError> {
    let current = dataset.get(variable).ok_or_else(|| ParamError::MissingVariable {
        variable: variable.to_string(),
    })?;
    let (c_max, c_min) = current
        .extremes()
        .ok_or_else(|| ParamError::EmptyVariable { variable: variable.to_string() })?;

    info!("Adjusting {} with value {} ({:?})", variable, value, method);
    info!("{} currently has max {} and min {}", variable, c_max, c_min);

    let adjusted = match method {
        Adjust::Replace => current.values.mapv(|_| value),
        Adjust::Scale => current.values.mapv(|v| v * value),
    };
    // all-NaN after mutation fails the comparison below
    let (new_max, new_min) = extremes(&adjusted).unwrap_or((f64::NAN, f64::NAN));

    let (a_max, a_min) = if value >= 0.0 {
        (new_max, new_min)
    } else {
        (new_min, new_max)
    };
    let (expected_max, expected_min) = match method {
        Adjust::Replace => (value, value),
        Adjust::Scale => (c_max * value, c_min * value),
    };

    if (a_max - expected_max).abs() < PRECISION && (a_min - expected_min).abs() < PRECISION {
        info!("{} adjusted: new max {} and new min {}", variable, new_max, new_min);
        if let Some(target) = dataset.get_mut(variable) {
            target.values = adjusted;
        }
        Ok(())
    } else {
        error!("{} adjustment failed: max {} and min {}", variable, a_max, a_min);
        Err(ParamError::Verification {
            variable: variable.to_string(),
            expected_max,
            expected_min,
            actual_max: a_max,
            actual_min: a_min,
        })
    }
}

/// Apply one parameter value to every (variable, file) pair of a spec
///
/// Stops at the first failure. Pairs applied before the failure stay applied in `datasets`.
pub fn apply_across_files(spec: &ParameterSpec, value: f64, datasets: &mut GridSet) -> Result<(), ParamError> {
    info!("names: {:?}, files: {:?}, value: {}, adjust: {:?}", spec.names, spec.files, value, spec.adjust);
    for (name, file) in spec.targets() {
        let dataset = datasets.get_mut(file).ok_or_else(|| {
            error!("File {} not found in the dataset set", file);
            ParamError::MissingGridFile { file: file.to_string() }
        })?;
        adjust_value(name, dataset, spec.adjust, value).map_err(|err| {
            error!("Adjusting {} in {} failed", name, file);
            err
        })?;
        info!("File {} adjusted successfully", file);
    }
    Ok(())
}

/// Load the gridded files from `input_dir`, apply every spec in order and save into `output_dir`
///
/// Nothing is written when any spec fails.
pub fn apply_grid_params(
    adjustments: &[(ParameterSpec, f64)],
    input_dir: &Path,
    output_dir: &Path,
) -> Result<(), ParamError> {
    info!("Reading grid files from {}", input_dir.display());
    let mut datasets = load_grid_datasets(input_dir)?;
    for (spec, value) in adjustments {
        apply_across_files(spec, *value, &mut datasets)?;
        info!("Parameters {:?} adjusted successfully", spec.names);
    }
    info!("All grid parameters adjusted, saving to {}", output_dir.display());
    save_grid_datasets(&datasets, output_dir)
}
