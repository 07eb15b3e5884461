//! Seams to the systems around the trigger.
//!
//! The trigger decides and dispatches; everything it reads from or submits to
//! lives behind one of these traits. In-memory implementations live in
//! [`crate::fakes`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    BuildRecord, BuildRequest, HistoryResult, Job, MembershipResult, SchedulerResult,
    SchedulingHandle, SourceResult, TriggerEvent,
};
use trigger_state::StorageResult;

/// External build queue.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a build request.
    ///
    /// Returns once the request is accepted for queueing; never waits for the
    /// build. Coalescing and quiet-period handling are the scheduler's business.
    async fn schedule(&self, request: BuildRequest) -> SchedulerResult<SchedulingHandle>;
}

/// Read access to a job's recorded builds.
#[async_trait]
pub trait BuildHistory: Send + Sync {
    /// All recorded builds of `job`.
    ///
    /// Implementations MUST return builds newest first. Previous-build
    /// resolution takes the first match it sees.
    async fn builds(&self, job: &str) -> HistoryResult<Vec<BuildRecord>>;
}

/// Organization membership lookup.
#[async_trait]
pub trait OrgMembership: Send + Sync {
    async fn is_member(&self, org: &str, login: &str) -> MembershipResult<bool>;
}

/// Where pull-request events come from.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events that arrived since the last poll (polling delivery).
    ///
    /// An event carrying a `delivery` id stays pending until it is
    /// acknowledged, and a later poll may return it again.
    async fn poll(&self, job: &Job) -> SourceResult<Vec<TriggerEvent>>;

    /// The event with this delivery id was handled (dispatched or rejected).
    ///
    /// Events whose dispatch failed are never acknowledged.
    async fn acknowledge(&self, _job: &Job, _delivery: &str) -> SourceResult<()> {
        Ok(())
    }

    /// A stream of pushed events (webhook delivery), if the source offers one.
    fn subscribe(&self, _job: &Job) -> Option<mpsc::Receiver<TriggerEvent>> {
        None
    }
}

/// Persists the host's full state as one unit.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save(&self) -> StorageResult<()>;
}

/// The external collaborators a bound trigger talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub scheduler: Arc<dyn Scheduler>,
    pub history: Arc<dyn BuildHistory>,
    pub orgs: Arc<dyn OrgMembership>,
    pub events: Arc<dyn EventSource>,
}

impl Collaborators {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        history: Arc<dyn BuildHistory>,
        orgs: Arc<dyn OrgMembership>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            scheduler,
            history,
            orgs,
            events,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
