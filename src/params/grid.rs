use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use ndarray::{ArrayD, IxDyn};

use crate::params::ParamError;

/// The closed set of gridded parameter files every run directory carries
pub static GRID_FILES: [&str; 4] = [
    "Fulldom_hires.nc",
    "hydro2dtbl.nc",
    "soil_properties.nc",
    "GWBUCKPARM.nc",
];

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Name of the pristine copy of a grid file kept in the parameter directory
///
/// `Fulldom_hires.nc` is read from `Fulldom_hires.nc0`, so an adjusted run never feeds on the
/// output of an earlier one.
pub fn source_file_name(file: &str) -> String {
    format!("{}0", file)
}

/// A named multi-dimensional variable
#[derive(Debug, Clone, PartialEq)]
pub struct GridVariable {
    pub dims: Vec<String>,
    pub values: ArrayD<f64>,
}

impl GridVariable {
    pub fn new(dims: Vec<String>, values: ArrayD<f64>) -> GridVariable {
        GridVariable { dims, values }
    }

    /// Largest and smallest value, skipping NaN cells
    ///
    /// Returns `None` when the variable holds no comparable values.
    pub fn extremes(&self) -> Option<(f64, f64)> {
        extremes(&self.values)
    }
}

pub(crate) fn extremes(values: &ArrayD<f64>) -> Option<(f64, f64)> {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((max, min)) => Some((max.max(v), min.min(v))),
        })
}

/// The numeric variables of one netCDF file, keyed by variable name
///
/// A dataset read from disk remembers its file. Saving it copies that file and overwrites the
/// numeric variables, so attributes and non-numeric variables reach the model unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridDataset {
    pub variables: BTreeMap<String, GridVariable>,
    source: Option<PathBuf>,
}

impl GridDataset {
    pub fn insert(&mut self, name: &str, variable: GridVariable) {
        self.variables.insert(name.to_string(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&GridVariable> {
        self.variables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut GridVariable> {
        self.variables.get_mut(name)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Grid datasets keyed by canonical file name
pub type GridSet = BTreeMap<String, GridDataset>;

/// Read the four canonical grid files from their pristine copies in `dir`
///
/// A missing or unreadable file fails the whole load.
pub fn load_grid_datasets(dir: &Path) -> Result<GridSet, ParamError> {
    let mut datasets = GridSet::new();
    for file in GRID_FILES.iter() {
        let dataset = read_grid_file(&dir.join(source_file_name(file)))?;
        info!("Grid file {} read successfully", file);
        datasets.insert(file.to_string(), dataset);
    }
    Ok(datasets)
}

/// Read every numeric variable of one netCDF file
pub fn read_grid_file(path: &Path) -> Result<GridDataset, ParamError> {
    read_dataset(path).map_err(|err| {
        error!("Failed to read grid file {}: {}", path.display(), err);
        ParamError::GridLoad { path: path.to_path_buf(), source: err }
    })
}

fn read_dataset(path: &Path) -> Result<GridDataset, BoxedError> {
    let file = netcdf::open(path)?;
    let mut dataset = GridDataset { source: Some(path.to_path_buf()), ..GridDataset::default() };
    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        // char and string variables are carried over by the file copy on save
        let values = match var.get_values::<f64, _>(..) {
            Ok(values) => values,
            Err(err) => {
                debug!("Skipping variable {} of {}: {}", name, path.display(), err);
                continue;
            }
        };
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
        dataset.insert(&name, GridVariable::new(dims, values));
    }
    Ok(dataset)
}

/// Write every dataset into `dir` under its canonical name, creating `dir` if needed
///
/// Files already written stay written when a later one fails.
pub fn save_grid_datasets(datasets: &GridSet, dir: &Path) -> Result<(), ParamError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|err| ParamError::GridSave {
            path: dir.to_path_buf(),
            source: Box::new(err),
        })?;
        info!("Created output directory {}", dir.display());
    }

    for (file, dataset) in datasets {
        let path = dir.join(file);
        write_grid_file(dataset, &path)?;
        info!("Grid file {} saved to {}", file, path.display());
    }
    Ok(())
}

/// Write one dataset as a netCDF file
pub fn write_grid_file(dataset: &GridDataset, path: &Path) -> Result<(), ParamError> {
    write_dataset(path, dataset).map_err(|err| {
        error!("Failed to save grid file {}: {}", path.display(), err);
        ParamError::GridSave { path: path.to_path_buf(), source: err }
    })
}

/// Write to a hidden sibling then rename, so a reader never sees half a file
fn write_dataset(path: &Path, dataset: &GridDataset) -> Result<(), BoxedError> {
    let tmp = temp_sibling(path);
    let written = match dataset.source() {
        Some(source) => overwrite_copy(source, &tmp, dataset),
        None => create_fresh(&tmp, dataset),
    };
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::File::open(&tmp)?.sync_all()?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn overwrite_copy(source: &Path, tmp: &Path, dataset: &GridDataset) -> Result<(), BoxedError> {
    fs::copy(source, tmp)?;
    let mut file = netcdf::append(tmp)?;
    for (name, variable) in &dataset.variables {
        let mut var = file
            .variable_mut(name)
            .ok_or_else(|| format!("variable {} is not in {}", name, source.display()))?;
        let values: Vec<f64> = variable.values.iter().copied().collect();
        var.put_values(values.as_slice(), ..)?;
    }
    Ok(())
}

fn create_fresh(tmp: &Path, dataset: &GridDataset) -> Result<(), BoxedError> {
    let mut file = netcdf::create(tmp)?;
    for (name, variable) in &dataset.variables {
        if variable.dims.len() != variable.values.ndim() {
            let reason = format!(
                "variable {} names {} dimensions for {} axes",
                name,
                variable.dims.len(),
                variable.values.ndim()
            );
            return Err(reason.into());
        }
        for (dim, &len) in variable.dims.iter().zip(variable.values.shape()) {
            if file.dimension(dim).is_none() {
                file.add_dimension(dim, len)?;
            }
        }
        let dims: Vec<&str> = variable.dims.iter().map(String::as_str).collect();
        let mut var = file.add_variable::<f64>(name, &dims)?;
        let values: Vec<f64> = variable.values.iter().copied().collect();
        var.put_values(values.as_slice(), ..)?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("grid");
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A grid set with one 2x2 variable per file
    pub(crate) fn sample_set() -> GridSet {
        let mut set = GridSet::new();
        for file in GRID_FILES.iter() {
            let mut ds = GridDataset::default();
            let values = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.1, 0.2, 0.3, 0.4]).unwrap();
            ds.insert("slope", GridVariable::new(vec!["y".into(), "x".into()], values));
            set.insert(file.to_string(), ds);
        }
        set
    }

    /// Write a grid set as the pristine `*.nc0` copies a parameter directory holds
    pub(crate) fn write_sources(set: &GridSet, dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        for (file, ds) in set {
            write_grid_file(ds, &dir.join(source_file_name(file))).unwrap();
        }
    }

    fn hidden_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with('.'))
            .collect()
    }

    #[test]
    fn extremes_skip_nan() {
        let values = ArrayD::from_shape_vec(IxDyn(&[3]), vec![f64::NAN, 2.0, -1.0]).unwrap();
        assert_eq!(extremes(&values), Some((2.0, -1.0)));
    }

    #[test]
    fn extremes_of_empty_variable_is_none() {
        let values = ArrayD::<f64>::zeros(IxDyn(&[0]));
        assert_eq!(extremes(&values), None);
    }

    #[test]
    fn sources_are_read_from_zero_suffixed_files() {
        assert_eq!(source_file_name("Fulldom_hires.nc"), "Fulldom_hires.nc0");

        let dir = tempfile::tempdir().unwrap();
        write_sources(&sample_set(), dir.path());
        let loaded = load_grid_datasets(dir.path()).unwrap();

        assert_eq!(loaded.keys().collect::<Vec<_>>(), sample_set().keys().collect::<Vec<_>>());
        for (file, ds) in &loaded {
            assert_eq!(ds.variables, sample_set()[file].variables);
            assert_eq!(ds.source(), Some(dir.path().join(source_file_name(file)).as_path()));
        }
    }

    #[test]
    fn saved_set_is_netcdf_under_canonical_names() {
        let dir = tempfile::tempdir().unwrap();
        let params = dir.path().join("params_files");
        let out = dir.path().join("DOMAIN");
        write_sources(&sample_set(), &params);

        let mut set = load_grid_datasets(&params).unwrap();
        set.get_mut("hydro2dtbl.nc")
            .unwrap()
            .get_mut("slope")
            .unwrap()
            .values
            .mapv_inplace(|v| v * 2.0);
        save_grid_datasets(&set, &out).unwrap();

        for file in GRID_FILES.iter() {
            let saved = read_grid_file(&out.join(file)).unwrap();
            assert_eq!(saved.variables, set[*file].variables);
        }
        let doubled = read_grid_file(&out.join("hydro2dtbl.nc")).unwrap();
        assert_eq!(doubled.get("slope").unwrap().extremes(), Some((0.8, 0.2)));
        assert!(hidden_files(&out).is_empty());
    }

    #[test]
    fn saving_keeps_variables_that_are_not_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("GWBUCKPARM.nc0");
        {
            let mut file = netcdf::create(&source).unwrap();
            file.add_dimension("x", 2).unwrap();
                        let mut var = file.add_variable::<f64>("Zmax", &["x"]).unwrap();
            var.put_values(&[10.0f64, 20.0][..], ..).unwrap();
            file.add_string_variable("station", &["x"]).unwrap();
        }

        let mut ds = read_grid_file(&source).unwrap();
        ds.get_mut("Zmax").unwrap().values.mapv_inplace(|v| v + 1.0);
        let out = dir.path().join("GWBUCKPARM.nc");
        write_grid_file(&ds, &out).unwrap();

        let file = netcdf::open(&out).unwrap();
        assert!(file.variable("station").is_some());
        assert!(ds.get("station").is_none());
        let zmax = file.variable("Zmax").unwrap().get_values::<f64, _>(..).unwrap();
        assert_eq!(zmax, vec![11.0, 21.0]);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = sample_set();
        set.remove("GWBUCKPARM.nc");
        write_sources(&set, dir.path());

        match load_grid_datasets(dir.path()) {
            Err(ParamError::GridLoad { path, .. }) => assert!(path.ends_with("GWBUCKPARM.nc0")),
            other => panic!("expected GridLoad, got {:?}", other),
        }
    }

    #[test]
    fn malformed_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(&sample_set(), dir.path());
        fs::write(dir.path().join("hydro2dtbl.nc0"), "not netcdf").unwrap();

        match load_grid_datasets(dir.path()) {
            Err(ParamError::GridLoad { path, .. }) => assert!(path.ends_with("hydro2dtbl.nc0")),
            other => panic!("expected GridLoad, got {:?}", other),
        }
    }

    #[test]
    fn blocked_target_is_a_save_error_after_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("DOMAIN");
        fs::create_dir_all(out.join("hydro2dtbl.nc")).unwrap();

        match save_grid_datasets(&sample_set(), &out) {
            Err(ParamError::GridSave { path, .. }) => assert_eq!(path, out.join("hydro2dtbl.nc")),
            other => panic!("expected GridSave, got {:?}", other),
        }

        for file in ["Fulldom_hires.nc", "GWBUCKPARM.nc"] {
            let saved = read_grid_file(&out.join(file)).unwrap();
            assert_eq!(saved.variables, sample_set()[file].variables);
        }
        assert!(!out.join("soil_properties.nc").exists());
        assert!(hidden_files(&out).is_empty());
    }
}
