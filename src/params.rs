//! Parameter registry and the parameter adjustment engine
//!
//! Model parameters live in two places inside a run directory:
//! - four gridded files (see [`grid::GRID_FILES`]) holding named multi-dimensional variables
//! - the channel parameter table `CHANPARM.TBL`
//!
//! The [`registry`] says which variables in which gridded files a parameter key touches, and
//! whether the value replaces or scales them. Every gridded mutation is verified numerically
//! before it is kept.

use std::path::PathBuf;

use thiserror::Error;

/// Parameter catalog loaded from YAML
pub mod registry;
/// In-memory gridded datasets, read from and written to netCDF files
pub mod grid;
/// Replace/scale a variable and verify the result
pub mod adjust;
/// Rewrite the channel parameter table
pub mod channel;

pub use adjust::{adjust_value, apply_across_files, apply_grid_params, Adjust, ParameterSpec};
pub use channel::{apply_channel_params, CHANNEL_KEYS};
pub use grid::{
    load_grid_datasets, read_grid_file, save_grid_datasets, source_file_name, write_grid_file, GridDataset,
    GridSet, GridVariable,
};
pub use registry::ParameterRegistry;

/// Tolerance used when checking a mutated variable's extremes
pub const PRECISION: f64 = 1e-6;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("variable {variable} failed verification: expected max {expected_max} / min {expected_min}, got max {actual_max} / min {actual_min}")]
    Verification {
        variable: String,
        expected_max: f64,
        expected_min: f64,
        actual_max: f64,
        actual_min: f64,
    },
    #[error("variable {variable} has no values to adjust")]
    EmptyVariable { variable: String },
    #[error("variable {variable} not found in dataset")]
    MissingVariable { variable: String },
    #[error("grid file {file} is not part of the loaded dataset set")]
    MissingGridFile { file: String },
    #[error("can't load grid file {}", path.display())]
    GridLoad {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
    #[error("can't save grid file {}", path.display())]
    GridSave {
        path: PathBuf,
        #[source]
        source: BoxedError,
    },
    #[error("channel table {}: {reason}", path.display())]
    ChannelTable { path: PathBuf, reason: String },
}
