//! In-memory fakes for the trigger's collaborators (testing only)
//!
//! - `RecordingScheduler`: records requests, can reject, completes handles on demand
//! - `MemoryBuildHistory`: newest-first build lists per job
//! - `StaticOrgMembership`: fixed membership table with failing organizations
//! - `QueueEventSource`: polled queues plus push channels per job

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::collaborators::{BuildHistory, EventSource, OrgMembership, Scheduler};
use crate::domain::{
    BuildRecord, BuildRequest, HistoryError, HistoryResult, Job, MembershipError,
    MembershipResult, SchedulerError, SchedulerResult, SchedulingHandle, SourceError,
    SourceResult, TriggerEvent,
};
use trigger_state::BuildResult;

/// Scheduler that keeps every accepted request.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<BuildRequest>>,
    pending: Mutex<Vec<(Uuid, oneshot::Sender<BuildResult>)>>,
    reject_with: Mutex<Option<String>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent request with `reason`, or accept again with `None`.
    pub fn set_rejecting(&self, reason: Option<&str>) {
        *self.reject_with.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Finish every outstanding build with `result`. Returns how many were finished.
    pub fn complete_all(&self, result: BuildResult) -> usize {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(result);
        }
        count
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, request: BuildRequest) -> SchedulerResult<SchedulingHandle> {
        if let Some(reason) = self.reject_with.lock().unwrap().clone() {
            return Err(SchedulerError::Rejected { reason });
        }
        let queue_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push((queue_id, tx));
        self.requests.lock().unwrap().push(request);
        Ok(SchedulingHandle::with_completion(queue_id, rx))
    }
}

/// Build history held in memory, newest build first.
#[derive(Debug, Default)]
pub struct MemoryBuildHistory {
    builds: Mutex<HashMap<String, Vec<BuildRecord>>>,
    failing: Mutex<bool>,
}

impl MemoryBuildHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the history of `job`. `builds` must be newest first.
    pub fn set_builds(&self, job: &str, builds: Vec<BuildRecord>) {
        self.builds.lock().unwrap().insert(job.to_string(), builds);
    }

    /// Record a new build as the newest of `job`.
    pub fn push_newest(&self, job: &str, build: BuildRecord) {
        self.builds
            .lock()
            .unwrap()
            .entry(job.to_string())
            .or_default()
            .insert(0, build);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl BuildHistory for MemoryBuildHistory {
    async fn builds(&self, job: &str) -> HistoryResult<Vec<BuildRecord>> {
        if *self.failing.lock().unwrap() {
            return Err(HistoryError::Unavailable {
                job: job.to_string(),
                reason: "injected history failure".to_string(),
            });
        }
        Ok(self
            .builds
            .lock()
            .unwrap()
            .get(job)
            .cloned()
            .unwrap_or_default())
    }
}

/// Fixed organization membership. Organizations marked failing error on lookup.
#[derive(Debug, Default)]
pub struct StaticOrgMembership {
    members: HashSet<(String, String)>,
    failing: HashSet<String>,
    lookups: Mutex<usize>,
}

impl StaticOrgMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, org: &str, login: &str) -> Self {
        self.members
            .insert((org.to_lowercase(), login.to_lowercase()));
        self
    }

    pub fn with_failing_org(mut self, org: &str) -> Self {
        self.failing.insert(org.to_lowercase());
        self
    }

    /// Number of lookups served so far, failed ones included.
    pub fn lookup_count(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl OrgMembership for StaticOrgMembership {
    async fn is_member(&self, org: &str, login: &str) -> MembershipResult<bool> {
        *self.lookups.lock().unwrap() += 1;
        let org = org.to_lowercase();
        if self.failing.contains(&org) {
            return Err(MembershipError::Lookup {
                org,
                login: login.to_string(),
                reason: "injected lookup failure".to_string(),
            });
        }
        Ok(self.members.contains(&(org, login.to_lowercase())))
    }
}

/// Event source with a polled queue and an optional push channel per job.
#[derive(Debug, Default)]
pub struct QueueEventSource {
    queues: Mutex<HashMap<String, VecDeque<TriggerEvent>>>,
    pushers: Mutex<HashMap<String, mpsc::Sender<TriggerEvent>>>,
    acknowledged: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl QueueEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` for the next poll of `job`.
    pub fn enqueue(&self, job: &str, event: TriggerEvent) {
        self.queues
            .lock()
            .unwrap()
            .entry(job.to_string())
            .or_default()
            .push_back(event);
    }

    /// Push `event` to the subscriber of `job`. Returns `false` when nobody listens.
    pub async fn push(&self, job: &str, event: TriggerEvent) -> bool {
        let sender = self.pushers.lock().unwrap().get(job).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Delivery ids acknowledged so far, in order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for QueueEventSource {
    async fn poll(&self, job: &Job) -> SourceResult<Vec<TriggerEvent>> {
        if *self.failing.lock().unwrap() {
            return Err(SourceError::Fetch("injected poll failure".to_string()));
        }
        Ok(self
            .queues
            .lock()
            .unwrap()
            .get_mut(&job.full_name)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn acknowledge(&self, _job: &Job, delivery: &str) -> SourceResult<()> {
        self.acknowledged.lock().unwrap().push(delivery.to_string());
        Ok(())
    }

    fn subscribe(&self, job: &Job) -> Option<mpsc::Receiver<TriggerEvent>> {
        let (tx, rx) = mpsc::channel(64);
        self.pushers
            .lock()
            .unwrap()
            .insert(job.full_name.clone(), tx);
        Some(rx)
    }
}
