use std::collections::VecDeque;

use log::info;

/// Where every job id of a batch currently is
///
/// `waiting`, `running` and `finished` are disjoint and together always hold every id of the
/// batch. `errored` is the subset of `finished` that never made it to the batch scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleSet {
    waiting: VecDeque<String>,
    running: Vec<String>,
    finished: Vec<String>,
    errored: Vec<String>,
    peak_running: usize,
}

impl ScheduleSet {
    pub fn new<I: IntoIterator<Item = String>>(job_ids: I) -> ScheduleSet {
        ScheduleSet {
            waiting: job_ids.into_iter().collect(),
            ..ScheduleSet::default()
        }
    }

    /// The next job to launch, in input order
    pub fn next_waiting(&self) -> Option<&str> {
        self.waiting.front().map(String::as_str)
    }

    /// Move a waiting job into the running set
    pub fn admit(&mut self, job_id: &str) -> bool {
        if !take(&mut self.waiting, job_id) {
            return false;
        }
        self.running.push(job_id.to_string());
        self.peak_running = self.peak_running.max(self.running.len());
        true
    }

    /// Move a waiting job that failed to launch straight to finished and errored
    pub fn reject(&mut self, job_id: &str) -> bool {
        if !take(&mut self.waiting, job_id) {
            return false;
        }
        self.finished.push(job_id.to_string());
        self.errored.push(job_id.to_string());
        true
    }

    /// Move a running job that reached a terminal stage to finished
    pub fn reap(&mut self, job_id: &str) -> bool {
        match self.running.iter().position(|id| id == job_id) {
            Some(i) => {
                let id = self.running.remove(i);
                self.finished.push(id);
                true
            }
            None => false,
        }
    }

    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(String::as_str)
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn running(&self) -> &[String] {
        &self.running
    }

    pub fn finished(&self) -> &[String] {
        &self.finished
    }

    pub fn errored(&self) -> &[String] {
        &self.errored
    }

    /// Largest number of jobs that were ever running at once
    pub fn peak_running(&self) -> usize {
        self.peak_running
    }

    pub fn total(&self) -> usize {
        self.waiting.len() + self.running.len() + self.finished.len()
    }

    pub fn is_done(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }

    pub fn log_counts(&self) {
        info!(
            "waiting: {}, running: {}, finished: {}, errored: {}",
            self.waiting.len(),
            self.running.len(),
            self.finished.len(),
            self.errored.len()
        );
    }
}

fn take(queue: &mut VecDeque<String>, job_id: &str) -> bool {
    match queue.iter().position(|id| id == job_id) {
        Some(i) => queue.remove(i).is_some(),
        None => false,
    }
}
