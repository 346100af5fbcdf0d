use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::job::JobError;

/// Suffixes `_1` to `_5` are tried when `run_dir/job_id` is taken
pub const MAX_DIR_SUFFIX: usize = 5;

/// Create a fresh job directory under `run_dir`
///
/// Tries `run_dir/job_id`, then `job_id_1` up to `job_id_5`. Only safe against sequential
/// reuse: another process creating the same path between the check and the create wins.
pub fn claim_job_dir(run_dir: &Path, job_id: &str) -> Result<PathBuf, JobError> {
    let base = run_dir.join(job_id);
    let mut candidate = base.clone();
    let mut attempt = 0;
    while candidate.exists() {
        warn!("Job directory {} already exists. Choosing a new directory.", candidate.display());
        attempt += 1;
        if attempt > MAX_DIR_SUFFIX {
            return Err(JobError::DirectoryCollision { base, attempts: MAX_DIR_SUFFIX });
        }
        candidate = run_dir.join(format!("{}_{}", job_id, attempt));
    }

    fs::create_dir_all(&candidate).map_err(|source| JobError::Staging {
        job_dir: candidate.clone(),
        source,
    })?;
    Ok(candidate)
}

/// Recursively copy `src` into `dst`, returning the number of files copied
///
/// Symlinks are followed so the job directory holds real files.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    info!("Copied {} files from {} to {}", copied, src.display(), dst.display());
    Ok(copied)
}
