//! Build parameters and commit pin for a pull-request build.

use crate::domain::{BuildCause, CommitPin, Job, ParameterSet, ParameterValue};

/// The commit pin: literal sha or synthetic merge ref.
pub const SHA1: &str = "sha1";
/// Head commit of the pull request, even when `sha1` is the merge ref.
pub const ACTUAL_COMMIT: &str = "ghprbActualCommit";
pub const PULL_ID: &str = "ghprbPullId";
pub const TARGET_BRANCH: &str = "ghprbTargetBranch";
pub const SOURCE_BRANCH: &str = "ghprbSourceBranch";
pub const PULL_AUTHOR_EMAIL: &str = "ghprbPullAuthorEmail";
pub const PULL_LINK: &str = "ghprbPullLink";

/// Every parameter name the builder computes, in submission order.
pub const COMPUTED: [&str; 7] = [
    SHA1,
    ACTUAL_COMMIT,
    PULL_ID,
    TARGET_BRANCH,
    SOURCE_BRANCH,
    PULL_AUTHOR_EMAIL,
    PULL_LINK,
];

/// Output of [`ParameterBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParameters {
    pub parameters: ParameterSet,
    /// Same value as the `sha1` parameter; also drives the revision directive.
    pub pin: CommitPin,
}

pub struct ParameterBuilder;

impl ParameterBuilder {
    /// Job defaults first, then the computed pull-request parameters.
    ///
    /// Defaults whose names collide with a computed parameter are dropped so
    /// each name appears once. Absent optional cause fields become `""`.
    pub fn build(job: &Job, cause: &BuildCause, repo_url: &str) -> BuildParameters {
        let pin = if cause.merged {
            CommitPin::merge_ref(cause.pull_id)
        } else {
            CommitPin::commit(cause.commit.clone())
        };

        let mut parameters: ParameterSet = job
            .parameter_definitions
            .iter()
            .filter(|def| !COMPUTED.contains(&def.name.as_str()))
            .map(|def| ParameterValue::new(&def.name, &def.default_value))
            .collect();

        let link = match cause.url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => pull_link(repo_url, cause.pull_id),
        };

        parameters.push(SHA1, pin.as_str());
        parameters.push(ACTUAL_COMMIT, &cause.commit);
        parameters.push(PULL_ID, cause.pull_id.to_string());
        parameters.push(TARGET_BRANCH, cause.target_branch.as_deref().unwrap_or_default());
        parameters.push(SOURCE_BRANCH, cause.source_branch.as_deref().unwrap_or_default());
        parameters.push(PULL_AUTHOR_EMAIL, cause.author_email.as_deref().unwrap_or_default());
        parameters.push(PULL_LINK, link);

        BuildParameters { parameters, pin }
    }
}

/// `<repo>/pull/<id>`. The repository URL is used as given.
pub fn pull_link(repo_url: &str, pull_id: u64) -> String {
    format!("{}/pull/{}", repo_url, pull_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "https://github.com/org/demo";

    #[test]
    fn test_head_build_parameters() {
        let job = Job::new("demo");
        let cause = BuildCause::new(7, "abc123").with_branches("feature", "master");
        let built = ParameterBuilder::build(&job, &cause, REPO);

        let p = &built.parameters;
        assert_eq!(p.get(SHA1), Some("abc123"));
        assert_eq!(p.get(ACTUAL_COMMIT), Some("abc123"));
        assert_eq!(p.get(PULL_ID), Some("7"));
        assert_eq!(p.get(TARGET_BRANCH), Some("master"));
        assert_eq!(p.get(SOURCE_BRANCH), Some("feature"));
        assert_eq!(p.get(PULL_AUTHOR_EMAIL), Some(""));
        assert_eq!(p.get(PULL_LINK), Some("https://github.com/org/demo/pull/7"));
        assert_eq!(built.pin, CommitPin::commit("abc123"));
    }

    #[test]
    fn test_merged_build_pins_merge_ref() {
        let job = Job::new("demo");
        let cause = BuildCause::new(42, "def456").merged(true);
        let built = ParameterBuilder::build(&job, &cause, REPO);

        assert_eq!(built.parameters.get(SHA1), Some("origin/pr/42/merge"));
        assert_eq!(built.parameters.get(ACTUAL_COMMIT), Some("def456"));
        assert_eq!(built.pin.as_str(), "origin/pr/42/merge");
    }

    #[test]
    fn test_job_defaults_kept_but_computed_names_win() {
        let job = Job::new("demo")
            .with_parameter("sha1", "stale")
            .with_parameter("TARGET_ENV", "staging")
            .with_parameter(PULL_ID, "0");
        let cause = BuildCause::new(3, "abc123");
        let built = ParameterBuilder::build(&job, &cause, REPO);

        let p = &built.parameters;
        assert_eq!(p.count(SHA1), 1);
        assert_eq!(p.count(PULL_ID), 1);
        assert_eq!(p.get(PULL_ID), Some("3"));
        assert!(p.contains(&ParameterValue::new("TARGET_ENV", "staging")));
        assert_eq!(p.iter().next().map(|v| v.name.as_str()), Some("TARGET_ENV"));
    }

    #[test]
    fn test_missing_optionals_are_empty_never_null() {
        let job = Job::new("demo");
        let cause = BuildCause::new(9, "abc123");
        let built = ParameterBuilder::build(&job, &cause, REPO);

        for name in [TARGET_BRANCH, SOURCE_BRANCH, PULL_AUTHOR_EMAIL] {
            assert_eq!(built.parameters.get(name), Some(""));
        }
        assert!(built.parameters.iter().all(|v| v.value != "null"));
    }

    #[test]
    fn test_cause_url_overrides_derived_link() {
        let job = Job::new("demo");
        let cause = BuildCause::new(9, "abc123")
            .with_url("https://github.com/org/demo/pull/9#files")
            .with_author_email("dev@example.com");
        let built = ParameterBuilder::build(&job, &cause, REPO);

        assert_eq!(built.parameters.get(PULL_LINK), Some("https://github.com/org/demo/pull/9#files"));
        assert_eq!(built.parameters.get(PULL_AUTHOR_EMAIL), Some("dev@example.com"));
    }

    #[test]
    fn test_pull_link_appends_to_repo_url_verbatim() {
        assert_eq!(pull_link("https://github.com/org/demo", 5), "https://github.com/org/demo/pull/5");
        assert_eq!(pull_link("https://github.com/org/demo/", 5), "https://github.com/org/demo//pull/5");
    }
}
