//! Build causes and the events that carry them.

use serde::{Deserialize, Serialize};

/// Why (and what) one build attempt was triggered.
///
/// Built fresh for every qualifying event and never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCause {
    /// Pull request number, unique within a job.
    pub pull_id: u64,
    /// Head commit of the pull request.
    pub commit: String,
    /// Build the speculative merge of the pull request instead of its head.
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    /// Canonical pull request URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl BuildCause {
    pub fn new(pull_id: u64, commit: impl Into<String>) -> Self {
        Self {
            pull_id,
            commit: commit.into(),
            merged: false,
            source_branch: None,
            target_branch: None,
            author_email: None,
            url: None,
        }
    }

    pub fn merged(mut self, merged: bool) -> Self {
        self.merged = merged;
        self
    }

    pub fn with_branches(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_branch = Some(source.into());
        self.target_branch = Some(target.into());
        self
    }

    pub fn with_author_email(mut self, email: impl Into<String>) -> Self {
        self.author_email = Some(email.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Short description for logs and build displays.
    pub fn short_description(&self) -> String {
        let mode = if self.merged { "merge" } else { "head" };
        format!("PR #{} ({} {})", self.pull_id, mode, self.commit)
    }
}

/// One delivery from an event source: who asked, for what, in which repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Login of the user whose action produced the event.
    pub actor: String,
    pub cause: BuildCause,
    /// Canonical repository URL, used to derive the pull request link.
    pub repo_url: String,
    /// Source-assigned id of this delivery, handed back on acknowledgement.
    #[serde(skip)]
    pub delivery: Option<String>,
}

impl TriggerEvent {
    pub fn new(actor: impl Into<String>, cause: BuildCause, repo_url: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            cause,
            repo_url: repo_url.into(),
            delivery: None,
        }
    }

    pub fn with_delivery(mut self, delivery: impl Into<String>) -> Self {
        self.delivery = Some(delivery.into());
        self
    }
}
