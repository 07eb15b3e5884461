//! Per-job tracked pull requests.
//!
//! The outer map is only locked to find or create a job's slice. Each slice
//! has its own lock, so writers to one job never block another job, and
//! writers to the same job take turns.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use trigger_state::{JobPullRequests, PullRequestState};

/// Job full name → tracked pull requests, shared by every trigger of a host.
#[derive(Debug, Default)]
pub struct PullRequestRegistry {
    jobs: Mutex<HashMap<String, JobSlice>>,
}

impl PullRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot.
    pub fn from_persisted(pull_requests: BTreeMap<String, JobPullRequests>) -> Self {
        let jobs = pull_requests
            .into_iter()
            .map(|(job, pulls)| {
                let slice = JobSlice::with_pulls(job.clone(), pulls);
                (job, slice)
            })
            .collect();
        Self {
            jobs: Mutex::new(jobs),
        }
    }

    /// The slice for `job`, created empty on first access.
    pub fn get(&self, job: &str) -> JobSlice {
        lock(&self.jobs)
            .entry(job.to_string())
            .or_insert_with(|| JobSlice::with_pulls(job.to_string(), JobPullRequests::new()))
            .clone()
    }

    pub fn put(&self, job: &str, pull_id: u64, state: PullRequestState) {
        self.get(job).put(pull_id, state);
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.jobs).keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy of every slice, for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, JobPullRequests> {
        let slices: Vec<JobSlice> = lock(&self.jobs).values().cloned().collect();
        slices
            .into_iter()
            .map(|slice| (slice.job_name.clone(), slice.snapshot()))
            .collect()
    }
}

/// Handle on one job's tracked pull requests. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct JobSlice {
    job_name: String,
    pulls: Arc<Mutex<JobPullRequests>>,
}

impl JobSlice {
    fn with_pulls(job_name: String, pulls: JobPullRequests) -> Self {
        Self {
            job_name,
            pulls: Arc::new(Mutex::new(pulls)),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn get(&self, pull_id: u64) -> Option<PullRequestState> {
        lock(&self.pulls).get(&pull_id).cloned()
    }

    pub fn put(&self, pull_id: u64, state: PullRequestState) {
        lock(&self.pulls).insert(pull_id, state);
    }

    /// Read-modify-write of one entry under the slice lock, creating it if absent.
    pub fn update<R>(&self, pull_id: u64, f: impl FnOnce(&mut PullRequestState) -> R) -> R {
        let mut pulls = lock(&self.pulls);
        f(pulls.entry(pull_id).or_default())
    }

    pub fn snapshot(&self) -> JobPullRequests {
        lock(&self.pulls).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.pulls).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pulls).is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
