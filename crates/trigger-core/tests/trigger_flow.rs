//! End-to-end trigger behaviour through `TriggerHost` with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use trigger_core::fakes::{MemoryBuildHistory, QueueEventSource, RecordingScheduler, StaticOrgMembership};
use trigger_core::params::{PULL_AUTHOR_EMAIL, PULL_ID, PULL_LINK, SHA1};
use trigger_core::{
    BuildCause, BuildRecord, BuildResult, Collaborators, CommitState, Denial, EventOutcome, Grant,
    Job, ParameterSet, ScmSnapshot, TriggerConfig, TriggerError, TriggerEvent, TriggerHost,
};
use trigger_state::fakes::MemoryStateStore;
use trigger_state::FileStateStore;

const REPO: &str = "https://github.com/org/demo";

struct Harness {
    host: TriggerHost,
    store: Arc<MemoryStateStore>,
    scheduler: Arc<RecordingScheduler>,
    history: Arc<MemoryBuildHistory>,
    events: Arc<QueueEventSource>,
}

fn collaborators(
    scheduler: &Arc<RecordingScheduler>,
    history: &Arc<MemoryBuildHistory>,
    orgs: StaticOrgMembership,
    events: &Arc<QueueEventSource>,
) -> Collaborators {
    Collaborators::new(
        scheduler.clone(),
        history.clone(),
        Arc::new(orgs),
        events.clone(),
    )
}

async fn harness_with(store: Arc<MemoryStateStore>, orgs: StaticOrgMembership) -> Harness {
    let scheduler = Arc::new(RecordingScheduler::new());
    let history = Arc::new(MemoryBuildHistory::new());
    let events = Arc::new(QueueEventSource::new());
    let host = TriggerHost::load(store.clone(), collaborators(&scheduler, &history, orgs, &events))
        .await
        .unwrap();
    Harness {
        host,
        store,
        scheduler,
        history,
        events,
    }
}

async fn harness() -> Harness {
    harness_with(Arc::new(MemoryStateStore::new()), StaticOrgMembership::new()).await
}

fn demo_config() -> TriggerConfig {
    TriggerConfig {
        admin_list: "alice".to_string(),
        whitelist: "bob".to_string(),
        org_list: "acme".to_string(),
        ..TriggerConfig::default()
    }
}

fn demo_job() -> Job {
    Job::new("demo").with_github_project(REPO)
}

fn demo_cause(pull_id: u64) -> BuildCause {
    BuildCause::new(pull_id, "abc123").with_branches("feature", "master")
}

fn event(actor: &str, cause: BuildCause) -> TriggerEvent {
    TriggerEvent::new(actor, cause, REPO)
}

fn bound(h: &Harness, config: TriggerConfig) {
    h.host.configure("demo", config);
    assert!(h.host.bind(&demo_job()).unwrap());
}

#[tokio::test]
async fn test_demo_scenario_dispatches_and_tracks() {
    let h = harness().await;
    bound(&h, demo_config());

    let outcome = h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Dispatched { grant: Grant::Admin, .. }));

    let requests = h.scheduler.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.job, "demo");
    assert_eq!(request.revision.as_str(), "abc123");
    assert_eq!(request.parameters.get(SHA1), Some("abc123"));
    assert_eq!(request.parameters.count(SHA1), 1);
    assert_eq!(request.parameters.get(PULL_ID), Some("7"));
    assert_eq!(request.parameters.get(PULL_AUTHOR_EMAIL), Some(""));
    assert_eq!(request.parameters.get(PULL_LINK), Some("https://github.com/org/demo/pull/7"));
    assert!(request.previous_build.is_none());

    let tracked = h.host.registry().get("demo").get(7).unwrap();
    assert_eq!(tracked.last_commit_sha, "abc123");
    assert_eq!(tracked.last_result, BuildResult::Queued);
    assert_eq!(tracked.source_branch, "feature");
    assert_eq!(tracked.target_branch, "master");

    let saved = h.store.snapshot().unwrap();
    assert_eq!(saved.pull_requests["demo"][&7].last_commit_sha, "abc123");
}

#[tokio::test]
async fn test_merged_cause_pins_merge_ref() {
    let h = harness().await;
    bound(&h, demo_config());

    h.host
        .handle_event("demo", event("alice", BuildCause::new(42, "def456").merged(true)))
        .await
        .unwrap();

    let request = &h.scheduler.requests()[0];
    assert_eq!(request.revision.as_str(), "origin/pr/42/merge");
    assert_eq!(request.parameters.get(SHA1), Some("origin/pr/42/merge"));
    assert_eq!(request.parameters.get("ghprbActualCommit"), Some("def456"));
}

#[tokio::test]
async fn test_unlisted_actor_is_rejected_without_dispatch() {
    let h = harness().await;
    bound(&h, demo_config());

    let outcome = h.host.handle_event("demo", event("mallory", demo_cause(7))).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Rejected(Denial::Actor)));
    assert_eq!(h.scheduler.request_count(), 0);
    assert!(h.host.registry().get("demo").is_empty());
}

#[tokio::test]
async fn test_branch_filter_rejects_even_admins() {
    let h = harness().await;
    bound(
        &h,
        TriggerConfig {
            target_branches: vec!["release/*".to_string()],
            ..demo_config()
        },
    );

    let outcome = h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Rejected(Denial::TargetBranch(_))));

    let release = BuildCause::new(8, "abc123").with_branches("feature", "release/2.0");
    let outcome = h.host.handle_event("demo", event("alice", release)).await.unwrap();
    assert!(outcome.is_dispatched());
}

#[tokio::test]
async fn test_org_member_is_authorized() {
    let h = harness_with(
        Arc::new(MemoryStateStore::new()),
        StaticOrgMembership::new().with_member("acme", "dave"),
    )
    .await;
    bound(&h, demo_config());

    let outcome = h.host.handle_event("demo", event("dave", demo_cause(7))).await.unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Dispatched { grant: Grant::Organization(ref org), .. } if org == "acme"
    ));
}

#[tokio::test]
async fn test_membership_lookup_failure_fails_closed() {
    let h = harness_with(
        Arc::new(MemoryStateStore::new()),
        StaticOrgMembership::new()
            .with_member("acme", "dave")
            .with_failing_org("acme"),
    )
    .await;
    bound(&h, demo_config());

    let outcome = h.host.handle_event("demo", event("dave", demo_cause(7))).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Rejected(Denial::Actor)));
    assert_eq!(h.scheduler.request_count(), 0);
}

#[tokio::test]
async fn test_dispatch_failure_surfaces_and_leaves_registry_untouched() {
    let h = harness().await;
    bound(&h, demo_config());
    h.scheduler.set_rejecting(Some("queue full"));

    let err = h
        .host
        .handle_event("demo", event("alice", demo_cause(7)))
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::Dispatch { pull_id: 7, .. }));
    assert!(h.host.registry().get("demo").get(7).is_none());

    // A redelivered event is treated as fresh once the scheduler recovers.
    h.scheduler.set_rejecting(None);
    let outcome = h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    assert!(outcome.is_dispatched());
    assert!(h.host.registry().get("demo").get(7).is_some());
}

#[tokio::test]
async fn test_repeated_events_are_not_deduplicated() {
    let h = harness().await;
    bound(&h, demo_config());

    for _ in 0..3 {
        h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    }
    assert_eq!(h.scheduler.request_count(), 3);
    assert_eq!(h.host.registry().get("demo").len(), 1);
}

#[tokio::test]
async fn test_previous_build_is_attached() {
    let h = harness().await;
    bound(&h, demo_config());

    let mut params = ParameterSet::new();
    params.push(PULL_ID, "7");
    h.history.push_newest(
        "demo",
        BuildRecord::new(11)
            .with_parameters(params)
            .with_snapshot(ScmSnapshot::new("0ld5ha")),
    );

    h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    let link = h.scheduler.requests()[0].previous_build.clone().unwrap();
    assert_eq!(link.build_number, 11);
    assert_eq!(link.snapshot.last_built_revision, "0ld5ha");
}

#[tokio::test]
async fn test_whitelist_kept_in_memory_when_save_fails() {
    let h = harness().await;
    bound(&h, demo_config());
    h.store.set_fail_saves(true);

    h.host.add_to_whitelist("demo", "dave").await.unwrap();
    let whitelist = h.host.config("demo").unwrap().whitelist;
    assert!(whitelist.split_whitespace().any(|t| t == "dave"));
    assert!(h.store.snapshot().is_none());

    let outcome = h.host.handle_event("demo", event("dave", demo_cause(3))).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Dispatched { grant: Grant::Whitelist, .. }));

    h.store.set_fail_saves(false);
    h.host.save().await.unwrap();
    let saved = h.store.snapshot().unwrap();
    assert!(saved.triggers["demo"].whitelist.contains("dave"));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let store = Arc::new(MemoryStateStore::new());
    {
        let h = harness_with(store.clone(), StaticOrgMembership::new()).await;
        bound(&h, demo_config());
        h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
        h.host.shutdown();
    }

    let h = harness_with(store, StaticOrgMembership::new()).await;
    assert_eq!(h.host.config("demo"), Some(demo_config()));
    assert!(h.host.trigger("demo").is_none());
    assert_eq!(h.host.registry().get("demo").get(7).unwrap().last_commit_sha, "abc123");

    assert!(h.host.bind(&demo_job()).unwrap());
    assert!(h.host.trigger("demo").is_some());
}

#[tokio::test]
async fn test_unknown_and_unbound_jobs() {
    let h = harness().await;
    let err = h.host.handle_event("nope", event("alice", demo_cause(1))).await.unwrap_err();
    assert!(matches!(err, TriggerError::UnknownJob { .. }));

    h.host.configure("demo", demo_config());
    assert!(!h.host.bind(&Job::new("demo")).unwrap());
    let err = h.host.handle_event("demo", event("alice", demo_cause(1))).await.unwrap_err();
    assert!(matches!(err, TriggerError::NotBound { .. }));
    assert_eq!(h.host.run("demo").await.unwrap(), None);
}

#[tokio::test]
async fn test_reconfigure_replaces_config_and_unbinds() {
    let h = harness().await;
    bound(&h, demo_config());
    h.host.add_to_whitelist("demo", "dave").await.unwrap();

    h.host.configure(
        "demo",
        TriggerConfig {
            permit_all: true,
            ..TriggerConfig::default()
        },
    );
    assert!(h.host.trigger("demo").is_none());
    let config = h.host.config("demo").unwrap();
    assert!(config.permit_all);
    assert_eq!(config.whitelist, "");
}

#[tokio::test]
async fn test_remove_forgets_trigger_and_keeps_tracked_pulls() {
    let h = harness().await;
    bound(&h, demo_config());
    h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();

    let removed = h.host.remove("demo").unwrap();
    assert_eq!(removed.admin_list, "alice");
    assert!(h.host.trigger("demo").is_none());
    assert!(h.host.config("demo").is_none());
    assert!(h.host.remove("demo").is_none());
    let err = h.host.handle_event("demo", event("alice", demo_cause(8))).await.unwrap_err();
    assert!(matches!(err, TriggerError::UnknownJob { .. }));

    h.host.save().await.unwrap();
    let saved = h.store.snapshot().unwrap();
    assert!(!saved.triggers.contains_key("demo"));
    assert_eq!(saved.pull_requests["demo"][&7].last_commit_sha, "abc123");
}

#[tokio::test]
async fn test_polling_acknowledges_only_handled_deliveries() {
    let h = harness().await;
    bound(&h, demo_config());
    h.events.enqueue("demo", event("alice", demo_cause(1)).with_delivery("d1"));
    h.events.enqueue("demo", event("mallory", demo_cause(2)).with_delivery("d2"));
    h.host.run("demo").await.unwrap().unwrap();
    assert_eq!(h.events.acknowledged(), vec!["d1", "d2"]);

    h.scheduler.set_rejecting(Some("queue full"));
    h.events.enqueue("demo", event("alice", demo_cause(3)).with_delivery("d3"));
    let report = h.host.run("demo").await.unwrap().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.events.acknowledged(), vec!["d1", "d2"]);
}

#[tokio::test]
async fn test_polling_pass_counts_and_saves() {
    let h = harness().await;
    bound(&h, demo_config());
    h.events.enqueue("demo", event("alice", demo_cause(1)));
    h.events.enqueue("demo", event("mallory", demo_cause(2)));

    let report = h.host.run("demo").await.unwrap().unwrap();
    assert_eq!(report.events, 2);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failed, 0);
    assert!(h.store.save_count() >= 1);
    assert_eq!(h.store.snapshot().unwrap().tracked_count(), 1);
}

#[tokio::test]
async fn test_polling_source_failure_is_an_error() {
    let h = harness().await;
    bound(&h, demo_config());
    h.events.set_failing(true);
    let err = h.host.run("demo").await.unwrap_err();
    assert!(matches!(err, TriggerError::Source(_)));
}

#[tokio::test]
async fn test_push_delivery_dispatches_until_stopped() {
    let h = harness().await;
    bound(
        &h,
        TriggerConfig {
            use_webhooks: true,
            ..demo_config()
        },
    );
    let orchestrator = h.host.trigger("demo").unwrap().orchestrator().unwrap();
    assert!(orchestrator.is_listening());

    assert!(h.events.push("demo", event("alice", demo_cause(5))).await);
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.scheduler.request_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(h.host.registry().get("demo").get(5).is_some());

    h.host.unbind("demo").unwrap();
    assert!(!orchestrator.is_listening());
}

#[tokio::test]
async fn test_completion_report() {
    let h = harness().await;
    let mut global = h.host.global();
    global.auto_close_failed_pull_requests = true;
    h.host.set_global(global);
    bound(&h, demo_config());
    h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    let orchestrator = h.host.trigger("demo").unwrap().orchestrator().unwrap();

    let report = orchestrator.record_completion(7, BuildResult::Unstable).await;
    assert_eq!(report.state, CommitState::Failure);
    assert_eq!(report.message, "Test FAILed.");
    assert!(report.close_pull_request);
    assert_eq!(
        h.host.registry().get("demo").get(7).unwrap().last_result,
        BuildResult::Unstable
    );

    let report = orchestrator.record_completion(7, BuildResult::Success).await;
    assert_eq!(report.state, CommitState::Success);
    assert_eq!(report.message, "Test PASSed.");
    assert!(!report.close_pull_request);
    assert_eq!(
        h.store.snapshot().unwrap().pull_requests["demo"][&7].last_result,
        BuildResult::Success
    );
}

#[tokio::test]
async fn test_scheduling_handle_reports_completion() {
    let h = harness().await;
    bound(&h, demo_config());
    let outcome = h.host.handle_event("demo", event("alice", demo_cause(7))).await.unwrap();
    let EventOutcome::Dispatched { handle, .. } = outcome else {
        panic!("expected dispatch");
    };
    h.scheduler.complete_all(BuildResult::Failure);
    assert_eq!(handle.completion().await, Some(BuildResult::Failure));
}

#[tokio::test]
async fn test_file_store_restart_keeps_registry_and_whitelist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let load = |path: std::path::PathBuf| async move {
        let scheduler = Arc::new(RecordingScheduler::new());
        let history = Arc::new(MemoryBuildHistory::new());
        let events = Arc::new(QueueEventSource::new());
        TriggerHost::load(
            Arc::new(FileStateStore::new(path)),
            collaborators(&scheduler, &history, StaticOrgMembership::new(), &events),
        )
        .await
        .unwrap()
    };

    let host = load(path.clone()).await;
    host.configure("demo", demo_config());
    host.bind(&demo_job()).unwrap();
    host.add_to_whitelist("demo", "dave").await.unwrap();
    host.handle_event("demo", event("dave", demo_cause(12))).await.unwrap();
    host.shutdown();

    let host = load(path).await;
    assert!(host.config("demo").unwrap().whitelist.contains("dave"));
    assert_eq!(host.registry().get("demo").get(12).unwrap().last_commit_sha, "abc123");
}
