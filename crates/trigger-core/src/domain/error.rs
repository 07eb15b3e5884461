//! Error taxonomy for the trigger core.
//!
//! Collaborator-facing errors ([`SchedulerError`], [`HistoryError`],
//! [`MembershipError`], [`SourceError`]) are produced by the external
//! adapters; [`TriggerError`] is what the core surfaces to its callers.

use trigger_state::StorageError;

/// Errors produced by a build scheduler adapter.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler rejected build request: {reason}")]
    Rejected { reason: String },

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced when reading a job's build history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("build history unavailable for job {job}: {reason}")]
    Unavailable { job: String, reason: String },
}

/// Errors produced by an organization-membership lookup.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("membership lookup failed for {login} in {org}: {reason}")]
    Lookup {
        org: String,
        login: String,
        reason: String,
    },
}

/// Errors produced by an event source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("event source failed: {0}")]
    Fetch(String),

    #[error("malformed event {origin}: {reason}")]
    Malformed { origin: String, reason: String },
}

/// Errors surfaced by trigger operations.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("dispatch of pull request #{pull_id} for job {job} failed: {source}")]
    Dispatch {
        job: String,
        pull_id: u64,
        #[source]
        source: SchedulerError,
    },

    #[error("trigger for job {job} is not bound")]
    NotBound { job: String },

    #[error("no trigger configured for job {job}")]
    UnknownJob { job: String },

    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for trigger operations.
pub type TriggerResult<T> = std::result::Result<T, TriggerError>;
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
pub type HistoryResult<T> = std::result::Result<T, HistoryError>;
pub type MembershipResult<T> = std::result::Result<T, MembershipError>;
pub type SourceResult<T> = std::result::Result<T, SourceError>;
