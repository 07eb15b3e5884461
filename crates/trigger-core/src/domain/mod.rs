//! Domain models for the pull-request trigger.
//!
//! - `Job`: the CI job a trigger is attached to (read-only here)
//! - `BuildCause` / `TriggerEvent`: why a build is requested
//! - `ParameterSet` / `CommitPin`: the build identity handed to the scheduler
//! - `BuildRecord` / `BuildRequest`: history in, requests out

pub mod build;
pub mod cause;
pub mod error;
pub mod job;
pub mod parameters;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use trigger_state::{GlobalConfig, TriggerConfig};

pub use build::{BuildRecord, BuildRequest, PreviousBuildLink, SchedulingHandle, ScmSnapshot};
pub use cause::{BuildCause, TriggerEvent};
pub use error::{
    HistoryError, HistoryResult, MembershipError, MembershipResult, SchedulerError,
    SchedulerResult, SourceError, SourceResult, TriggerError, TriggerResult,
};
pub use job::{Job, ParameterDefinition};
pub use parameters::{CommitPin, ParameterSet, ParameterValue};

/// Trigger configuration shared between a lifecycle and its orchestrator.
pub type SharedConfig = Arc<RwLock<TriggerConfig>>;

/// Global settings shared by every trigger of a host.
pub type SharedGlobal = Arc<RwLock<GlobalConfig>>;

/// Read a shared value, recovering from a poisoned lock.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write a shared value, recovering from a poisoned lock.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
