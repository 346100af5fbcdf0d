use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{error, info, warn};

use crate::batch::{BatchScheduler, ExternalStatus};
use crate::config::{JobSettings, RunLayout, DOMAIN_DIR};
use crate::job::request::{JobRequest, Period};
use crate::job::snapshot::JobSnapshot;
use crate::job::stage::{JobStage, StageRecord};
use crate::job::workdir::{claim_job_dir, copy_tree};
use crate::job::JobError;
use crate::params::{apply_channel_params, apply_grid_params, ParameterRegistry, ParameterSpec, CHANNEL_KEYS};

/// One simulation run: where it lives, what it changes and how far it got
///
/// `job_dir` is assigned once by [`Job::stage`] and the external handle once by [`Job::submit`].
/// Every stage change goes through a single checked transition and is appended to the history.
#[derive(Debug, Clone)]
pub struct Job {
    job_id: String,
    event_no: String,
    period: Option<Period>,
    set_params: BTreeMap<String, f64>,
    layout: RunLayout,
    raw_run_dir: PathBuf,
    settings: JobSettings,
    stage: JobStage,
    external_handle: Option<String>,
    job_dir: Option<PathBuf>,
    last_status: Option<String>,
    unknown_polls: u32,
    failure: Option<String>,
    history: Vec<StageRecord>,
}

impl Job {
    pub fn new(job_id: &str, request: JobRequest, layout: &RunLayout, settings: &JobSettings) -> Job {
        let raw_run_dir = layout.raw_run_dir(&request.event_no);
        Job {
            job_id: job_id.to_string(),
            event_no: request.event_no,
            period: request.period,
            set_params: request.set_params,
            layout: layout.clone(),
            raw_run_dir,
            settings: settings.clone(),
            stage: JobStage::Created,
            external_handle: None,
            job_dir: None,
            last_status: None,
            unknown_polls: 0,
            failure: None,
            history: vec![StageRecord::now(JobStage::Created)],
        }
    }

    /// Rebuild a fresh job from a saved snapshot so it can run again
    ///
    /// Identity, period, parameters and directories are kept. Stage, handle and history start
    /// over, and `settings` replaces whatever file names the snapshot carried.
    pub fn from_snapshot(path: &Path, settings: &JobSettings) -> Result<Job, JobError> {
        let snapshot = JobSnapshot::load(path)?;
        info!("Job {} restored from {}", snapshot.job_id, path.display());
        Ok(Job::restore(snapshot, settings))
    }

    /// A fresh job carrying a snapshot's identity and parameters
    ///
    /// The saved stage is not carried over, the job starts again from `Created`.
    pub fn restore(snapshot: JobSnapshot, settings: &JobSettings) -> Job {
        let request = JobRequest {
            event_no: snapshot.event_no,
            period: snapshot.period,
            set_params: snapshot.set_params,
        };
        Job::new(&snapshot.job_id, request, &snapshot.layout, settings)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn event_no(&self) -> &str {
        &self.event_no
    }

    pub fn period(&self) -> Option<&Period> {
        self.period.as_ref()
    }

    pub fn set_params(&self) -> &BTreeMap<String, f64> {
        &self.set_params
    }

    pub fn current_stage(&self) -> JobStage {
        self.stage
    }

    pub fn external_handle(&self) -> Option<&str> {
        self.external_handle.as_deref()
    }

    pub fn job_dir(&self) -> Option<&Path> {
        self.job_dir.as_deref()
    }

    pub fn raw_run_dir(&self) -> &Path {
        &self.raw_run_dir
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Raw status token of the latest poll, `ERROR` when the query itself failed
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// Consecutive polls that returned a token nobody recognises
    pub fn unknown_polls(&self) -> u32 {
        self.unknown_polls
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn update_params(&mut self, params: BTreeMap<String, f64>) -> Result<(), JobError> {
        if self.stage > JobStage::Staged {
            return Err(JobError::ParamsFrozen(self.job_id.clone()));
        }
        self.set_params = params;
        Ok(())
    }

    /// Copy the event's template run directory into a fresh job directory
    pub fn stage(&mut self) -> Result<PathBuf, JobError> {
        self.expect_stage(JobStage::Created, JobStage::Staged)?;
        match self.copy_run_source() {
            Ok(job_dir) => {
                self.job_dir = Some(job_dir.clone());
                self.advance(JobStage::Staged)?;
                Ok(job_dir)
            }
            Err(err) => {
                error!("Job {} failed to create its run directory: {}", self.job_id, err);
                Err(self.record_failure("copy_folder", err))
            }
        }
    }

    fn copy_run_source(&self) -> Result<PathBuf, JobError> {
        if !self.raw_run_dir.is_dir() {
            return Err(JobError::MissingSource(self.raw_run_dir.clone()));
        }
        let job_dir = claim_job_dir(&self.layout.run_dir, &self.job_id)?;
        info!("Copying {} to {}", self.raw_run_dir.display(), job_dir.display());
        copy_tree(&self.raw_run_dir, &job_dir).map_err(|source| JobError::Staging {
            job_dir: job_dir.clone(),
            source,
        })?;
        Ok(job_dir)
    }

    /// Write the job's gridded files and channel table from the pristine parameter files
    pub fn parameterize(&mut self, registry: &ParameterRegistry) -> Result<(), JobError> {
        self.expect_stage(JobStage::Staged, JobStage::Parameterized)?;
        let job_dir = self
            .job_dir
            .clone()
            .ok_or_else(|| JobError::NotStaged(self.job_id.clone()))?;
        match self.apply_params(registry, &job_dir) {
            Ok(()) => self.advance(JobStage::Parameterized),
            Err(err) => {
                error!("Job {}: {}", self.job_id, err);
                Err(self.record_failure("inital_params", err))
            }
        }
    }

    fn apply_params(&self, registry: &ParameterRegistry, job_dir: &Path) -> Result<(), JobError> {
        let mut channel_params = BTreeMap::new();
        let mut grid_params: Vec<(ParameterSpec, f64)> = Vec::new();
        for (key, value) in &self.set_params {
            if CHANNEL_KEYS.contains(&key.as_str()) {
                channel_params.insert(key.clone(), *value);
                continue;
            }
            let spec = registry
                .resolve(key, *value)
                .ok_or_else(|| JobError::UnknownParameter(key.clone()))?;
            grid_params.push((spec.clone(), *value));
        }

        let params_dir = self.layout.params_dir();
        info!("Job {}: adjusting {} grid parameters", self.job_id, grid_params.len());
        apply_grid_params(&grid_params, &params_dir, &job_dir.join(DOMAIN_DIR)).map_err(JobError::Parameterization)?;
        info!("Job {}: adjusting channel parameters", self.job_id);
        apply_channel_params(&channel_params, &params_dir, job_dir).map_err(JobError::Parameterization)?;
        Ok(())
    }

    /// Hand the job script to the batch scheduler
    ///
    /// A job that was accepted is `Running` from our point of view; queued time is not tracked
    /// separately.
    pub fn submit(&mut self, backend: &dyn BatchScheduler) -> Result<(), JobError> {
        self.expect_stage(JobStage::Parameterized, JobStage::Submitted)?;
        let job_dir = self
            .job_dir
            .clone()
            .ok_or_else(|| JobError::NotStaged(self.job_id.clone()))?;
        let script = job_dir.join(&self.settings.submit_script);
        info!("Submitting {}", script.display());

        match backend.submit(&script, &job_dir) {
            Ok(handle) => {
                info!("Job {} submitted with id {}", self.job_id, handle);
                self.external_handle = Some(handle);
                self.advance(JobStage::Submitted)?;
                self.advance(JobStage::Running)
            }
            Err(err) => {
                error!("Job {} submission failed: {}", self.job_id, err);
                Err(self.record_failure("submit_pbs_job", JobError::Submission(err)))
            }
        }
    }

    /// Stage, parameterise and submit in one go
    pub fn launch(&mut self, registry: &ParameterRegistry, backend: &dyn BatchScheduler) -> Result<(), JobError> {
        self.stage()?;
        self.parameterize(registry)?;
        self.submit(backend)
    }

    /// Ask the scheduler how the job is doing and move it to a terminal stage if it is done
    ///
    /// Finished jobs are not queried again. A failed query leaves the stage alone.
    pub fn poll(&mut self, backend: &dyn BatchScheduler) -> Result<JobStage, JobError> {
        if self.stage.is_terminal() {
            return Ok(self.stage);
        }
        let handle = match (&self.external_handle, self.stage.is_submitted()) {
            (Some(handle), true) => handle.clone(),
            _ => return Err(JobError::NotSubmitted(self.job_id.clone())),
        };

        let status = match backend.query(&handle) {
            Ok(status) => status,
            Err(err) => {
                warn!("Job {} ({}) status query failed: {}", self.job_id, handle, err);
                self.last_status = Some("ERROR".to_string());
                return Err(JobError::Poll(err));
            }
        };
        self.last_status = Some(status.token().to_string());

        match status {
            ExternalStatus::Running => self.unknown_polls = 0,
            ExternalStatus::Completed => {
                self.unknown_polls = 0;
                self.advance(JobStage::Completed)?;
            }
            ExternalStatus::Failed => {
                self.unknown_polls = 0;
                self.advance(JobStage::Failed)?;
            }
            ExternalStatus::Unknown(token) => {
                self.unknown_polls += 1;
                warn!(
                    "Job {} ({}) reported unknown status {:?}, {} in a row",
                    self.job_id, handle, token, self.unknown_polls
                );
            }
        }
        Ok(self.stage)
    }

    /// Give up on a running job
    pub fn mark_failed(&mut self, reason: &str) -> Result<(), JobError> {
        self.advance(JobStage::Failed)?;
        self.failure = Some(reason.to_string());
        Ok(())
    }

    /// Copy the result artifact of a finished job into the result directory
    ///
    /// Returns the written path, or `None` when there was nothing to collect.
    pub fn collect(&self) -> Result<Option<PathBuf>, JobError> {
        if !self.stage.is_terminal() {
            info!("Job {} is {}, nothing to collect yet", self.job_id, self.stage);
            return Ok(None);
        }
        let artifact = match &self.job_dir {
            Some(job_dir) => job_dir.join(&self.settings.result_artifact),
            None => return Ok(None),
        };
        if !artifact.is_file() {
            warn!("Result file {} of job {} not found", artifact.display(), self.job_id);
            return Ok(None);
        }

        let mark = match self.stage {
            JobStage::Failed => "_error",
            _ => "",
        };
        let target = self
            .layout
            .result_dir
            .join(format!("{}_{}{}.txt", self.job_id, self.event_no, mark));
        let copied = fs::create_dir_all(&self.layout.result_dir).and_then(|_| fs::copy(&artifact, &target));
        match copied {
            Ok(_) => {
                info!("Result of job {} copied to {}", self.job_id, target.display());
                Ok(Some(target))
            }
            Err(source) => {
                error!("Failed to copy result of job {}: {}", self.job_id, source);
                self.save_snapshot("collect_frxst");
                Err(JobError::Collection { path: target, source })
            }
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            event_no: self.event_no.clone(),
            period: self.period.clone(),
            layout: self.layout.clone(),
            raw_run_dir: self.raw_run_dir.clone(),
            set_params: self.set_params.clone(),
            stage: self.stage,
            job_dir: self.job_dir.clone(),
            external_handle: self.external_handle.clone(),
            last_status: self.last_status.clone(),
            failure: self.failure.clone(),
            history: self.history.clone(),
            settings: self.settings.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Write the job's state to the config directory, logging instead of failing
    pub fn save_snapshot(&self, tag: &str) -> Option<PathBuf> {
        match self.snapshot().save(&self.layout.config_dir, tag) {
            Ok(path) => Some(path),
            Err(err) => {
                error!("Failed to save configuration of job {}: {}", self.job_id, err);
                None
            }
        }
    }

    fn record_failure(&mut self, tag: &str, err: JobError) -> JobError {
        self.failure = Some(err.to_string());
        self.save_snapshot(tag);
        err
    }

    fn expect_stage(&self, expected: JobStage, next: JobStage) -> Result<(), JobError> {
        if self.stage == expected {
            return Ok(());
        }
        Err(JobError::InvalidTransition {
            job_id: self.job_id.clone(),
            from: self.stage,
            to: next,
        })
    }

    fn advance(&mut self, next: JobStage) -> Result<(), JobError> {
        if !self.stage.can_advance_to(next) {
            return Err(JobError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.stage,
                to: next,
            });
        }
        if next.is_submitted() && self.external_handle.is_none() {
            return Err(JobError::NotSubmitted(self.job_id.clone()));
        }
        info!("Job {}: {} -> {}", self.job_id, self.stage, next);
        self.stage = next;
        self.history.push(StageRecord::now(next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::batch::BatchError;
    use crate::config::PARAMS_FILES_DIR;
    use crate::params::channel::CHANNEL_TEMPLATE;
    use crate::params::grid::tests::{sample_set, write_sources};
    use crate::params::read_grid_file;

    static REGISTRY: &str = "\
SLOPE:
  name: [slope, slope]
  file: [Fulldom_hires.nc, soil_properties.nc]
  adjust: scale
  minValue: 0.1
  maxValue: 2.0
  iniValue: 1.0
";

    /// Scheduler double answering queries from a script, one token per call
    struct FakeBackend {
        accept: bool,
        statuses: RefCell<Vec<Result<ExternalStatus, BatchError>>>,
    }

    impl FakeBackend {
        fn new(statuses: Vec<Result<ExternalStatus, BatchError>>) -> FakeBackend {
            FakeBackend { accept: true, statuses: RefCell::new(statuses) }
        }
    }

    impl BatchScheduler for FakeBackend {
        fn submit(&self, script: &Path, job_dir: &Path) -> Result<String, BatchError> {
            assert_eq!(script.parent(), Some(job_dir));
            match self.accept {
                true => Ok("4242.pbs01".to_string()),
                false => Err(BatchError::Rejected {
                    command: "qsub".into(),
                    code: Some(1),
                    stderr: "qsub: Unauthorized Request".into(),
                }),
            }
        }

        fn query(&self, _handle: &str) -> Result<ExternalStatus, BatchError> {
            self.statuses.borrow_mut().remove(0)
        }
    }

    fn layout(root: &Path) -> RunLayout {
        RunLayout {
            root_dir: root.to_path_buf(),
            run_source_dir: root.join("run_source"),
            run_dir: root.join("run"),
            result_dir: root.join("result"),
            config_dir: root.join("configs"),
        }
    }

    /// Template run directory for `event` plus the pristine parameter files
    fn seed(root: &Path, event: &str) -> RunLayout {
        let layout = layout(root);
        let raw = layout.raw_run_dir(event);
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("Hydrojob.pbs"), "#!/bin/bash\n").unwrap();
        fs::write(raw.join("frxst_pts_out.txt"), "0 2019-08-04 12.5\n").unwrap();

        let params_dir = layout.params_dir();
        write_sources(&sample_set(), &params_dir);
        fs::write(
            params_dir.join(CHANNEL_TEMPLATE),
            "Channel Parameters\n10,'Bw','HLINK','ChSSlp','MannN'\nORDER\n1, 1.0, 1.0, 1.0, 1.0\n",
        )
        .unwrap();
        layout
    }

    fn job(layout: &RunLayout, event: &str, params: &[(&str, f64)]) -> Job {
        let request = JobRequest {
            event_no: event.to_string(),
            period: None,
            set_params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        Job::new("pre_10072", request, layout, &JobSettings::default())
    }

    fn stages(job: &Job) -> Vec<JobStage> {
        job.history().iter().map(|record| record.stage).collect()
    }

    #[test]
    fn launch_runs_through_to_running() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let registry = ParameterRegistry::from_yaml_str(REGISTRY).unwrap();
        let mut job = job(&layout, "Fuping_20190804", &[("SLOPE", 2.0), ("Bw", 2.0)]);

        job.launch(&registry, &FakeBackend::new(vec![])).unwrap();

        assert_eq!(job.current_stage(), JobStage::Running);
        assert!(job.external_handle().is_some());
        assert_eq!(
            stages(&job),
            [JobStage::Created, JobStage::Staged, JobStage::Parameterized, JobStage::Submitted, JobStage::Running]
        );

        let job_dir = job.job_dir().unwrap();
        assert!(job_dir.join("Hydrojob.pbs").is_file());
        let domain = job_dir.join(DOMAIN_DIR);
        let scaled = read_grid_file(&domain.join("Fulldom_hires.nc")).unwrap();
        assert_eq!(scaled.get("slope").unwrap().extremes(), Some((0.8, 0.2)));
        let untouched = read_grid_file(&domain.join("hydro2dtbl.nc")).unwrap();
        assert_eq!(untouched.get("slope").unwrap().extremes(), Some((0.4, 0.1)));
        let table = fs::read_to_string(job_dir.join("CHANPARM.TBL")).unwrap();
        assert!(table.ends_with("1,   2.000,   1.000,   1.000,   1.000\n"));
    }

    #[test]
    fn missing_source_leaves_job_created_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let mut job = job(&layout, "no_such_event", &[]);

        assert!(matches!(job.stage(), Err(JobError::MissingSource(_))));
        assert_eq!(job.current_stage(), JobStage::Created);
        assert_eq!(job.job_dir(), None);
        assert!(job.failure().unwrap().contains("does not exist"));
        let snapshot = layout.config_dir.join("pre_10072_no_such_event_copy_folder_config.yaml");
        assert!(snapshot.is_file());
    }

    #[test]
    fn unknown_parameter_fails_parameterisation() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let registry = ParameterRegistry::from_yaml_str(REGISTRY).unwrap();
        let mut job = job(&layout, "Fuping_20190804", &[("REFKDT", 0.5)]);

        job.stage().unwrap();
        match job.parameterize(&registry) {
            Err(JobError::UnknownParameter(key)) => assert_eq!(key, "REFKDT"),
            other => panic!("expected an unknown parameter, got {:?}", other),
        }
        assert_eq!(job.current_stage(), JobStage::Staged);
        assert!(layout
            .config_dir
            .join("pre_10072_Fuping_20190804_inital_params_config.yaml")
            .is_file());
    }

    #[test]
    fn rejected_submission_keeps_job_unsubmitted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let registry = ParameterRegistry::from_yaml_str(REGISTRY).unwrap();
        let mut job = job(&layout, "Fuping_20190804", &[]);
        let backend = FakeBackend { accept: false, statuses: RefCell::new(vec![]) };

        assert!(matches!(job.launch(&registry, &backend), Err(JobError::Submission(_))));
        assert_eq!(job.current_stage(), JobStage::Parameterized);
        assert_eq!(job.external_handle(), None);
        assert!(job.failure().unwrap().contains("Unauthorized"));
    }

    #[test]
    fn poll_moves_to_terminal_and_collects_error_mark() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let registry = ParameterRegistry::from_yaml_str(REGISTRY).unwrap();
        let mut job = job(&layout, "Fuping_20190804", &[]);
        let backend = FakeBackend::new(vec![
            Ok(ExternalStatus::Unknown("H".into())),
            Err(BatchError::EmptyCommand("".into())),
            Ok(ExternalStatus::Running),
            Ok(ExternalStatus::Failed),
        ]);
        job.launch(&registry, &backend).unwrap();
        assert_eq!(job.collect().unwrap(), None);

        assert_eq!(job.poll(&backend).unwrap(), JobStage::Running);
        assert_eq!(job.unknown_polls(), 1);
        assert!(matches!(job.poll(&backend), Err(JobError::Poll(_))));
        assert_eq!(job.last_status(), Some("ERROR"));
        assert_eq!(job.poll(&backend).unwrap(), JobStage::Running);
        assert_eq!(job.unknown_polls(), 0);
        assert_eq!(job.poll(&backend).unwrap(), JobStage::Failed);
        // finished jobs are not queried again
        assert_eq!(job.poll(&backend).unwrap(), JobStage::Failed);

        let collected = job.collect().unwrap().unwrap();
        assert_eq!(collected, layout.result_dir.join("pre_10072_Fuping_20190804_error.txt"));
        assert_eq!(fs::read_to_string(collected).unwrap(), "0 2019-08-04 12.5\n");
    }

    #[test]
    fn stages_cannot_be_skipped_or_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let mut job = job(&layout, "Fuping_20190804", &[]);

        assert!(matches!(
            job.submit(&FakeBackend::new(vec![])),
            Err(JobError::InvalidTransition { from: JobStage::Created, .. })
        ));
        assert!(matches!(job.poll(&FakeBackend::new(vec![])), Err(JobError::NotSubmitted(_))));
        assert!(matches!(job.mark_failed("gave up"), Err(JobError::InvalidTransition { .. })));

        let first = job.stage().unwrap();
        assert!(matches!(job.stage(), Err(JobError::InvalidTransition { .. })));
        assert_eq!(job.job_dir(), Some(first.as_path()));
        assert_eq!(stages(&job), [JobStage::Created, JobStage::Staged]);
    }

    #[test]
    fn params_freeze_after_parameterisation() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let registry = ParameterRegistry::from_yaml_str(REGISTRY).unwrap();
        let mut job = job(&layout, "Fuping_20190804", &[]);

        job.stage().unwrap();
        job.update_params([("MannN".to_string(), 0.8)].into_iter().collect()).unwrap();
        job.parameterize(&registry).unwrap();
        let frozen = job.update_params(BTreeMap::new());
        assert!(matches!(frozen, Err(JobError::ParamsFrozen(_))));
        assert_eq!(job.set_params()["MannN"], 0.8);
    }

    #[test]
    fn snapshot_restores_a_fresh_job() {
        let dir = tempfile::tempdir().unwrap();
        let layout = seed(dir.path(), "Fuping_20190804");
        let mut original = job(&layout, "no_such_event", &[("SLOPE", 1.5)]);
        assert!(original.stage().is_err());
        let path = layout.config_dir.join("pre_10072_no_such_event_copy_folder_config.yaml");

        let restored = Job::from_snapshot(&path, &JobSettings::default()).unwrap();

        assert_eq!(restored.job_id(), "pre_10072");
        assert_eq!(restored.event_no(), "no_such_event");
        assert_eq!(restored.set_params()["SLOPE"], 1.5);
        assert_eq!(restored.current_stage(), JobStage::Created);
        assert_eq!(restored.failure(), None);
        assert_eq!(restored.layout().params_dir(), layout.run_source_dir.join(PARAMS_FILES_DIR));
    }
}
