use std::collections::HashMap;
use std::time::Duration;

use log::{error, info, warn};
use rusqlite::Connection;
use thiserror::Error;

use crate::batch::BatchScheduler;
use crate::config::SchedulerConfig;
use crate::db::record_history;
use crate::job::{Job, JobStage};
use crate::params::ParameterRegistry;
use crate::schedule::pause::Pause;
use crate::schedule::set::ScheduleSet;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("job id {0} appears more than once in the batch")]
    DuplicateJob(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleOptions {
    pub max_concurrent: usize,
    /// quiescent interval after each submission and each polling round
    pub interval: Duration,
    pub unknown_status_limit: Option<u32>,
}

impl Default for ScheduleOptions {
    fn default() -> ScheduleOptions {
        ScheduleOptions::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for ScheduleOptions {
    fn from(config: &SchedulerConfig) -> ScheduleOptions {
        ScheduleOptions {
            max_concurrent: config.max_concurrent,
            interval: config.poll_interval(),
            unknown_status_limit: config.unknown_status_limit,
        }
    }
}

/// How a batch ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// every job, in the order it finished
    pub finished: Vec<String>,
    /// jobs that failed before they reached the batch scheduler
    pub errored: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub peak_running: usize,
}

impl BatchReport {
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn errored_count(&self) -> usize {
        self.errored.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Drives a batch of jobs through launch, polling and collection
pub struct Scheduler<'a, P: Pause> {
    registry: &'a ParameterRegistry,
    backend: &'a dyn BatchScheduler,
    pause: P,
    options: ScheduleOptions,
    ledger: Option<&'a Connection>,
}

impl<'a, P: Pause> Scheduler<'a, P> {
    pub fn new(
        registry: &'a ParameterRegistry,
        backend: &'a dyn BatchScheduler,
        pause: P,
        options: ScheduleOptions,
    ) -> Result<Scheduler<'a, P>, ScheduleError> {
        if options.max_concurrent == 0 {
            return Err(ScheduleError::ZeroConcurrency);
        }
        Ok(Scheduler { registry, backend, pause, options, ledger: None })
    }

    /// Record every job's stage history in a SQLite ledger as the batch runs
    pub fn with_ledger(mut self, ledger: &'a Connection) -> Scheduler<'a, P> {
        self.ledger = Some(ledger);
        self
    }

    pub fn options(&self) -> &ScheduleOptions {
        &self.options
    }

    /// Run every job to a terminal state, launching them in slice order
    ///
    /// A job that fails to launch is finished and errored without taking a running slot, and
    /// the next one is launched straight away. After every launch attempt running jobs are
    /// polled until a slot is free, or until all of them are done once nothing is waiting.
    pub fn schedule_batch(&mut self, jobs: &mut [Job]) -> Result<BatchReport, ScheduleError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if index.insert(job.job_id().to_string(), i).is_some() {
                return Err(ScheduleError::DuplicateJob(job.job_id().to_string()));
            }
        }

        let mut set = ScheduleSet::new(jobs.iter().map(|job| job.job_id().to_string()));
        info!(
            "Scheduling {} jobs, at most {} at a time",
            set.total(),
            self.options.max_concurrent
        );

        while let Some(job_id) = set.next_waiting().map(str::to_string) {
            let job = &mut jobs[index[&job_id]];
            info!("Launching job {}", job_id);
            match job.launch(self.registry, self.backend) {
                Ok(()) => {
                    set.admit(&job_id);
                    self.record(job);
                    self.pause.pause(self.options.interval);
                }
                Err(err) => {
                    error!("Job {} failed to launch: {}", job_id, err);
                    set.reject(&job_id);
                    self.record(job);
                }
            }
            self.drain(jobs, &index, &mut set);
        }

        info!("All jobs finished");
        set.log_counts();
        Ok(self.report(jobs, &index, &set))
    }

    fn drain(&mut self, jobs: &mut [Job], index: &HashMap<String, usize>, set: &mut ScheduleSet) {
        while (set.running().len() >= self.options.max_concurrent || set.waiting_len() == 0)
            && !set.running().is_empty()
        {
            self.poll_round(jobs, index, set);
            set.log_counts();
            self.pause.pause(self.options.interval);
        }
    }

    fn poll_round(&mut self, jobs: &mut [Job], index: &HashMap<String, usize>, set: &mut ScheduleSet) {
        let running = set.running().to_vec();
        for job_id in running {
            let job = &mut jobs[index[&job_id]];
            match job.poll(self.backend) {
                Ok(stage) if stage.is_terminal() => {}
                Ok(_) => self.escalate_unknown(job),
                Err(err) => warn!("Job {}: {}", job_id, err),
            }
            self.record(job);

            if job.current_stage().is_terminal() {
                if let Err(err) = job.collect() {
                    warn!("Job {}: {}", job_id, err);
                }
                job.save_snapshot("");
                set.reap(&job_id);
                info!("Job {} finished: {}", job_id, job.current_stage());
            }
        }
    }

    fn escalate_unknown(&self, job: &mut Job) {
        let limit = match self.options.unknown_status_limit {
            Some(limit) if job.unknown_polls() >= limit => limit,
            _ => return,
        };
        let reason = format!("status unknown for {} consecutive polls", limit);
        warn!("Job {}: {}, marking it failed", job.job_id(), reason);
        if let Err(err) = job.mark_failed(&reason) {
            error!("Job {}: {}", job.job_id(), err);
        }
    }

    fn record(&self, job: &Job) {
        if let Some(conn) = self.ledger {
            if let Err(err) = record_history(conn, job) {
                warn!("Failed to record job {} in the ledger: {}", job.job_id(), err);
            }
        }
    }

    fn report(&self, jobs: &[Job], index: &HashMap<String, usize>, set: &ScheduleSet) -> BatchReport {
        let with_stage = |stage: JobStage| -> Vec<String> {
            set.finished()
                .iter()
                .filter(|id| jobs[index[id.as_str()]].current_stage() == stage)
                .cloned()
                .collect()
        };
        BatchReport {
            finished: set.finished().to_vec(),
            errored: set.errored().to_vec(),
            completed: with_stage(JobStage::Completed),
            failed: with_stage(JobStage::Failed),
            peak_running: set.peak_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::batch::{BatchError, ExternalStatus};

    struct NeverCalled;

    impl BatchScheduler for NeverCalled {
        fn submit(&self, _script: &Path, _job_dir: &Path) -> Result<String, BatchError> {
            panic!("nothing to submit")
        }

        fn query(&self, _handle: &str) -> Result<ExternalStatus, BatchError> {
            panic!("nothing to query")
        }
    }

    struct CountingPause(usize);

    impl Pause for CountingPause {
        fn pause(&mut self, _interval: Duration) {
            self.0 += 1;
        }
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let registry = ParameterRegistry::default();
        let options = ScheduleOptions { max_concurrent: 0, ..ScheduleOptions::default() };
        let scheduler = Scheduler::new(&registry, &NeverCalled, CountingPause(0), options);
        assert!(matches!(scheduler, Err(ScheduleError::ZeroConcurrency)));
    }

    #[test]
    fn empty_batch_finishes_without_pausing() {
        let registry = ParameterRegistry::default();
        let mut pause = CountingPause(0);
        let mut scheduler = Scheduler::new(&registry, &NeverCalled, &mut pause, ScheduleOptions::default()).unwrap();

        let report = scheduler.schedule_batch(&mut []).unwrap();

        assert_eq!(report, BatchReport::default());
        assert_eq!(pause.0, 0);
    }

    #[test]
    fn defaults_follow_scheduler_config() {
        let options = ScheduleOptions::default();
        assert_eq!(options.max_concurrent, 5);
        assert_eq!(options.interval, Duration::from_secs(10));
        assert_eq!(options.unknown_status_limit, None);
    }
}
