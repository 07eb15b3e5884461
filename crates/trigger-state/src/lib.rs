//! Trigger-State: persistence for the pull-request trigger
//!
//! This crate owns everything the trigger writes to disk or to a database:
//! global settings, per-job trigger configuration, and the registry of
//! tracked pull requests. It has no knowledge of how events are authorized
//! or how builds are scheduled.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: schema stability (safe defaults for every field) and whole-unit
//! load/save.
//!
//! ## Key Components
//!
//! - `PersistedState`: the unit saved and loaded by every store
//! - `StateStore`: async load/save contract
//! - `FileStateStore`: atomic JSON file
//! - `SurrealStateStore`: single SurrealDB record
//! - `fakes::MemoryStateStore`: in-memory store for tests

mod error;
pub mod fakes;
pub mod file_store;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use file_store::FileStateStore;
pub use schema::{
    BuildResult, CommitState, GlobalConfig, JobPullRequests, PersistedState, PullRequestState,
    TriggerConfig, DEFAULT_CRON, DEFAULT_SERVER_API_URL,
};
pub use storage_traits::{StateStore, StorageResult};
pub use surreal_store::{CloudConfig, SurrealStateStore};
