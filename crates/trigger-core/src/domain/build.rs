//! Build history records and scheduler requests.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::cause::BuildCause;
use super::parameters::{CommitPin, ParameterSet};
use trigger_state::BuildResult;

/// Incremental source-control state recorded by a finished build.
///
/// Carried into the next build of the same pull request so its changelog is
/// computed against what was actually built last time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmSnapshot {
    pub last_built_revision: String,
    #[serde(default)]
    pub remote_urls: Vec<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

impl ScmSnapshot {
    pub fn new(last_built_revision: impl Into<String>) -> Self {
        Self {
            last_built_revision: last_built_revision.into(),
            remote_urls: Vec::new(),
            branch: None,
        }
    }
}

/// One entry of a job's build history, as exposed by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub number: u64,
    /// Parameters the build ran with; `None` for unparameterized builds.
    #[serde(default)]
    pub parameters: Option<ParameterSet>,
    #[serde(default)]
    pub scm_snapshots: Vec<ScmSnapshot>,
}

impl BuildRecord {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_snapshot(mut self, snapshot: ScmSnapshot) -> Self {
        self.scm_snapshots.push(snapshot);
        self
    }
}

/// Reference to a prior build's snapshot, attached to a new build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousBuildLink {
    pub build_number: u64,
    pub snapshot: ScmSnapshot,
}

/// A fully formed request handed to the build scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub job: String,
    /// Shown on the build; identifies the pull request and commit.
    pub cause: BuildCause,
    /// Injected into the build as parameters.
    pub parameters: ParameterSet,
    /// Exact revision to check out, never a floating branch.
    pub revision: CommitPin,
    #[serde(default)]
    pub previous_build: Option<PreviousBuildLink>,
    #[serde(default)]
    pub quiet_period_secs: u64,
}

/// What the scheduler hands back once a request is accepted.
///
/// The trigger never awaits `completion` itself; callers that care about the
/// outcome can.
#[derive(Debug)]
pub struct SchedulingHandle {
    pub queue_id: Uuid,
    completion: Option<oneshot::Receiver<BuildResult>>,
}

impl SchedulingHandle {
    /// A handle with no completion signal.
    pub fn detached(queue_id: Uuid) -> Self {
        Self {
            queue_id,
            completion: None,
        }
    }

    pub fn with_completion(queue_id: Uuid, completion: oneshot::Receiver<BuildResult>) -> Self {
        Self {
            queue_id,
            completion: Some(completion),
        }
    }

    /// Wait for the build to finish. `None` when the scheduler offers no
    /// completion signal or dropped it.
    pub async fn completion(self) -> Option<BuildResult> {
        match self.completion {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }
}
