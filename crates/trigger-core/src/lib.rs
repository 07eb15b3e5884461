//! Trigger-Core: decide and dispatch pull-request builds
//!
//! Given a signal that a pull request changed, the core decides whether the
//! requester may trigger a build, builds the exact parameter set and commit
//! pin, finds the previous build of the same pull request for incremental
//! checkout, hands the request to an external scheduler, and tracks the pull
//! request across restarts.
//!
//! ## Key Components
//!
//! - `AccessPolicy`: actor and target-branch rules
//! - `ParameterBuilder`: parameters and commit pin for a cause
//! - `PreviousBuildResolver`: prior build snapshot for the same pull request
//! - `PullRequestRegistry`: per-job tracked pull requests
//! - `TriggerLifecycle` / `RuntimeOrchestrator`: binding and event handling
//! - `TriggerHost`: load/save of everything as one unit
//!
//! Collaborators (scheduler, build history, org membership, event source)
//! are traits in [`collaborators`], with in-memory versions in [`fakes`].

pub mod access;
pub mod collaborators;
pub mod dispatch;
pub mod domain;
pub mod fakes;
pub mod host;
pub mod lifecycle;
pub mod obs;
pub mod orchestrator;
pub mod params;
pub mod previous_build;
pub mod registry;
pub mod telemetry;

pub use access::{add_to_whitelist, AccessDecision, AccessPolicy, Denial, Grant};
pub use collaborators::{
    BuildHistory, Collaborators, EventSource, OrgMembership, Persistence, Scheduler,
};
pub use dispatch::dispatch;
pub use domain::{
    BuildCause, BuildRecord, BuildRequest, CommitPin, HistoryError, Job, MembershipError,
    ParameterDefinition, ParameterSet, ParameterValue, PreviousBuildLink, SchedulerError,
    SchedulingHandle, ScmSnapshot, SharedConfig, SharedGlobal, SourceError, TriggerError,
    TriggerEvent, TriggerResult,
};
pub use host::TriggerHost;
pub use lifecycle::{BindContext, TriggerLifecycle};
pub use orchestrator::{CompletionReport, EventOutcome, PollReport, RuntimeOrchestrator};
pub use params::{BuildParameters, ParameterBuilder};
pub use previous_build::PreviousBuildResolver;
pub use registry::{JobSlice, PullRequestRegistry};

pub use trigger_state::{
    BuildResult, CommitState, GlobalConfig, PersistedState, PullRequestState, StateStore,
    StorageError, TriggerConfig,
};
