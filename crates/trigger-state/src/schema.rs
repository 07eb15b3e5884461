//! Persisted records for the pull-request trigger.
//!
//! Every field carries a serde default so that a record written by an older
//! release (or by hand) loads with safe values: empty string, `false`, or an
//! empty collection. Consumers never see a missing field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default polling schedule when neither the trigger nor the global settings name one.
pub const DEFAULT_CRON: &str = "*/5 * * * *";

/// Default GitHub API endpoint.
pub const DEFAULT_SERVER_API_URL: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// Trigger configuration
// ---------------------------------------------------------------------------

/// Per-job trigger configuration.
///
/// Replaced wholesale whenever the job is reconfigured. The whitelist is the
/// only field appended to at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Whitespace-separated logins with administrative rights.
    pub admin_list: String,
    /// Whitespace-separated logins allowed to trigger builds.
    pub whitelist: String,
    /// Whitespace-separated organizations whose members may trigger builds.
    pub org_list: String,
    /// Polling schedule; empty means "use the global schedule".
    pub cron: String,
    /// Phrase that requests a build in a pull-request comment.
    pub trigger_phrase: String,
    /// Only build when the trigger phrase is seen.
    pub only_trigger_phrase: bool,
    /// Events are pushed by webhook rather than discovered by polling.
    pub use_webhooks: bool,
    /// Anyone may trigger builds.
    pub permit_all: bool,
    /// Close pull requests whose build failed. `None` defers to the global setting.
    pub auto_close_failed_pull_requests: Option<bool>,
    /// Allowed target branches (exact names or `*` globs). Empty allows all.
    pub target_branches: Vec<String>,
}

impl TriggerConfig {
    /// Whether failed pull requests are closed, falling back to the global default.
    pub fn effective_auto_close(&self, global: &GlobalConfig) -> bool {
        self.auto_close_failed_pull_requests
            .unwrap_or(global.auto_close_failed_pull_requests)
    }

    /// The polling schedule, falling back to the global schedule when unset.
    pub fn effective_cron<'a>(&'a self, global: &'a GlobalConfig) -> &'a str {
        if self.cron.trim().is_empty() {
            global.cron.as_str()
        } else {
            self.cron.as_str()
        }
    }
}

/// Commit status reported for a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Process-wide trigger settings shared by every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub server_api_url: String,
    /// Whitespace-separated logins with administrative rights on every job.
    pub admin_list: String,
    pub published_url: String,
    pub request_for_testing_phrase: String,
    pub whitelist_phrase: String,
    pub ok_to_test_phrase: String,
    pub retest_phrase: String,
    pub cron: String,
    pub use_comments: bool,
    pub log_excerpt_lines: u32,
    /// Commit state published for unstable builds.
    pub unstable_as: CommitState,
    pub auto_close_failed_pull_requests: bool,
    pub msg_success: String,
    pub msg_failure: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            server_api_url: DEFAULT_SERVER_API_URL.to_string(),
            admin_list: String::new(),
            published_url: String::new(),
            request_for_testing_phrase: String::new(),
            whitelist_phrase: r".*add\W+to\W+whitelist.*".to_string(),
            ok_to_test_phrase: r".*ok\W+to\W+test.*".to_string(),
            retest_phrase: r".*test\W+this\W+please.*".to_string(),
            cron: DEFAULT_CRON.to_string(),
            use_comments: false,
            log_excerpt_lines: 0,
            unstable_as: CommitState::Failure,
            auto_close_failed_pull_requests: false,
            msg_success: "Test PASSed.".to_string(),
            msg_failure: "Test FAILed.".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracked pull requests
// ---------------------------------------------------------------------------

/// Result of the most recent build of a tracked pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    /// Seen, never handed to the scheduler.
    #[default]
    NotBuilt,
    /// Accepted by the scheduler, not finished yet.
    Queued,
    Success,
    Unstable,
    Failure,
    Aborted,
}

impl BuildResult {
    /// Whether the build finished (successfully or not).
    pub fn is_finished(self) -> bool {
        !matches!(self, BuildResult::NotBuilt | BuildResult::Queued)
    }
}

/// Tracked state of one pull request of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullRequestState {
    pub last_commit_sha: String,
    pub last_result: BuildResult,
    pub source_branch: String,
    pub target_branch: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Pull id → tracked state, for one job.
pub type JobPullRequests = BTreeMap<u64, PullRequestState>;

// ---------------------------------------------------------------------------
// Persisted unit
// ---------------------------------------------------------------------------

/// Everything saved and loaded as one unit: global settings, trigger
/// configuration per job, and tracked pull requests per job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub global: GlobalConfig,
    /// Job full name → trigger configuration.
    pub triggers: BTreeMap<String, TriggerConfig>,
    /// Job full name → tracked pull requests.
    pub pull_requests: BTreeMap<String, JobPullRequests>,
}

impl PersistedState {
    /// Number of tracked pull requests across all jobs.
    pub fn tracked_count(&self) -> usize {
        self.pull_requests.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_load_with_defaults() {
        let config: TriggerConfig = serde_json::from_str(r#"{"admin_list":"alice"}"#).unwrap();
        assert_eq!(config.admin_list, "alice");
        assert_eq!(config.whitelist, "");
        assert!(!config.permit_all);
        assert!(config.auto_close_failed_pull_requests.is_none());
        assert!(config.target_branches.is_empty());

        let global: GlobalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(global.cron, DEFAULT_CRON);
        assert_eq!(global.msg_success, "Test PASSed.");
        assert_eq!(global.unstable_as, CommitState::Failure);
    }

    #[test]
    fn test_effective_auto_close_falls_back_to_global() {
        let mut global = GlobalConfig::default();
        let config = TriggerConfig::default();
        assert!(!config.effective_auto_close(&global));

        global.auto_close_failed_pull_requests = true;
        assert!(config.effective_auto_close(&global));

        let explicit = TriggerConfig {
            auto_close_failed_pull_requests: Some(false),
            ..TriggerConfig::default()
        };
        assert!(!explicit.effective_auto_close(&global));
    }

    #[test]
    fn test_effective_cron() {
        let global = GlobalConfig::default();
        let config = TriggerConfig::default();
        assert_eq!(config.effective_cron(&global), DEFAULT_CRON);

        let config = TriggerConfig {
            cron: "H/2 * * * *".to_string(),
            ..TriggerConfig::default()
        };
        assert_eq!(config.effective_cron(&global), "H/2 * * * *");
    }

    #[test]
    fn test_pull_request_state_defaults() {
        let state: PullRequestState =
            serde_json::from_str(r#"{"last_commit_sha":"abc123"}"#).unwrap();
        assert_eq!(state.last_commit_sha, "abc123");
        assert_eq!(state.last_result, BuildResult::NotBuilt);
        assert_eq!(state.source_branch, "");
        assert!(state.updated_at.is_none());
    }

    #[test]
    fn test_pull_request_ids_survive_json_keys() {
        let mut state = PersistedState::default();
        state
            .pull_requests
            .entry("demo".to_string())
            .or_default()
            .insert(7, PullRequestState::default());

        let json = serde_json::to_string(&state).unwrap();
        let back: PersistedState = serde_json::from_str(&json).unwrap();
        assert!(back.pull_requests["demo"].contains_key(&7));
        assert_eq!(back.tracked_count(), 1);
    }

    #[test]
    fn test_build_result_finished() {
        assert!(!BuildResult::NotBuilt.is_finished());
        assert!(!BuildResult::Queued.is_finished());
        assert!(BuildResult::Success.is_finished());
        assert!(BuildResult::Aborted.is_finished());
    }
}
