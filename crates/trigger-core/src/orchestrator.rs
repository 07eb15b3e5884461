//! The live, non-persisted half of a bound trigger.
//!
//! A [`RuntimeOrchestrator`] is built from persisted configuration when a
//! trigger binds and thrown away when it unbinds. It ties the access policy,
//! dispatch and the job's registry slice together for each incoming event.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::access::{self, AccessDecision, AccessPolicy, Denial, Grant};
use crate::collaborators::{Collaborators, Persistence};
use crate::dispatch::dispatch;
use crate::domain::{self, Job, SchedulingHandle, SharedConfig, SharedGlobal, TriggerEvent, TriggerResult};
use crate::obs;
use crate::previous_build::PreviousBuildResolver;
use crate::registry::JobSlice;
use trigger_state::{BuildResult, CommitState, TriggerConfig};

/// What became of one event.
#[derive(Debug)]
pub enum EventOutcome {
    Dispatched {
        grant: Grant,
        handle: SchedulingHandle,
    },
    Rejected(Denial),
}

impl EventOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, EventOutcome::Dispatched { .. })
    }
}

/// Tally of one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub events: usize,
    pub dispatched: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Another pass was still running, so this one did nothing.
    pub skipped: bool,
}

/// What to publish for a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub pull_id: u64,
    pub result: BuildResult,
    /// Commit status; unstable builds map through the global `unstable_as`.
    pub state: CommitState,
    pub message: String,
    /// The build failed and failed pull requests are auto-closed.
    pub close_pull_request: bool,
}

pub struct RuntimeOrchestrator {
    job: Job,
    config: SharedConfig,
    global: SharedGlobal,
    pulls: JobSlice,
    collaborators: Collaborators,
    resolver: PreviousBuildResolver,
    persistence: Arc<dyn Persistence>,
    listener: Mutex<Option<JoinHandle<()>>>,
    poll_guard: tokio::sync::Mutex<()>,
}

impl RuntimeOrchestrator {
    pub fn new(
        job: Job,
        config: SharedConfig,
        global: SharedGlobal,
        pulls: JobSlice,
        collaborators: Collaborators,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let resolver = PreviousBuildResolver::new(Arc::clone(&collaborators.history));
        Self {
            job,
            config,
            global,
            pulls,
            collaborators,
            resolver,
            persistence,
            listener: Mutex::new(None),
            poll_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn pulls(&self) -> &JobSlice {
        &self.pulls
    }

    /// Current trigger configuration.
    pub fn config(&self) -> TriggerConfig {
        domain::read(&self.config).clone()
    }

    /// Authorize one event and, if allowed, dispatch it and track the pull request.
    ///
    /// Rejections are an `Ok` outcome. A dispatch failure is an error and leaves
    /// the registry untouched, so a redelivered event counts as new.
    pub async fn handle_event(&self, event: TriggerEvent) -> TriggerResult<EventOutcome> {
        let job_name = self.job.full_name.as_str();
        let pull_id = event.cause.pull_id;
        let config = self.config();
        let policy = AccessPolicy::new(&config);
        let target = event.cause.target_branch.as_deref().unwrap_or_default();

        let memberships = if policy.is_allowed_target_branch(target)
            && policy.needs_membership_lookup(&event.actor)
        {
            self.memberships(&policy, &event.actor).await
        } else {
            Vec::new()
        };

        let grant = match policy.evaluate(&event.actor, &memberships, target) {
            AccessDecision::Allowed(grant) => grant,
            AccessDecision::Denied(denial) => {
                obs::emit_event_rejected(job_name, pull_id, &event.actor, &denial);
                return Ok(EventOutcome::Rejected(denial));
            }
        };
        debug!(job = %job_name, pull_id, actor = %event.actor, grant = ?grant, "event authorized");

        let handle = match dispatch(
            &self.job,
            &event.cause,
            &event.repo_url,
            &self.resolver,
            self.collaborators.scheduler.as_ref(),
        )
        .await
        {
            Ok(handle) => handle,
            Err(err) => {
                obs::emit_dispatch_failed(job_name, pull_id, &err);
                return Err(err);
            }
        };

        let cause = &event.cause;
        self.pulls.update(pull_id, |pr| {
            pr.last_commit_sha = cause.commit.clone();
            pr.last_result = BuildResult::Queued;
            pr.source_branch = cause.source_branch.clone().unwrap_or_default();
            pr.target_branch = cause.target_branch.clone().unwrap_or_default();
            pr.updated_at = Some(Utc::now());
        });
        obs::emit_build_dispatched(job_name, cause, handle.queue_id);

        Ok(EventOutcome::Dispatched { grant, handle })
    }

    /// One polling pass over the event source. Passes never overlap: a pass
    /// requested while another runs is skipped.
    pub async fn poll_once(&self) -> TriggerResult<PollReport> {
        let Ok(_pass) = self.poll_guard.try_lock() else {
            debug!(job = %self.job.full_name, "poll already in progress; skipping");
            return Ok(PollReport {
                skipped: true,
                ..PollReport::default()
            });
        };

        let events = self.collaborators.events.poll(&self.job).await?;
        let mut report = PollReport {
            events: events.len(),
            ..PollReport::default()
        };

        for event in events {
            let delivery = event.delivery.clone();
            match self.handle_event(event).await {
                Ok(outcome) => {
                    if outcome.is_dispatched() {
                        report.dispatched += 1;
                    } else {
                        report.rejected += 1;
                    }
                    self.acknowledge(delivery.as_deref()).await;
                }
                // Left unacknowledged so the source hands it out again.
                Err(_) => report.failed += 1,
            }
        }

        obs::emit_poll_completed(
            &self.job.full_name,
            report.events,
            report.dispatched,
            report.rejected,
            report.failed,
        );
        Ok(report)
    }

    pub async fn add_to_whitelist(&self, login: &str) {
        access::add_to_whitelist(&self.config, self.persistence.as_ref(), &self.job.full_name, login)
            .await;
    }

    /// Record a finished build and work out what to publish for it.
    pub async fn record_completion(&self, pull_id: u64, result: BuildResult) -> CompletionReport {
        self.pulls.update(pull_id, |pr| {
            pr.last_result = result;
            pr.updated_at = Some(Utc::now());
        });
        obs::emit_build_completed(&self.job.full_name, pull_id, &result);

        let report = {
            let global = domain::read(&self.global);
            let config = domain::read(&self.config);
            let state = match result {
                BuildResult::Success => CommitState::Success,
                BuildResult::Unstable => global.unstable_as,
                BuildResult::Failure | BuildResult::Aborted => CommitState::Failure,
                BuildResult::NotBuilt | BuildResult::Queued => CommitState::Pending,
            };
            let message = match state {
                CommitState::Success => global.msg_success.clone(),
                CommitState::Pending => String::new(),
                CommitState::Failure | CommitState::Error => global.msg_failure.clone(),
            };
            let close_pull_request = result.is_finished()
                && state != CommitState::Success
                && config.effective_auto_close(&global);
            CompletionReport {
                pull_id,
                result,
                state,
                message,
                close_pull_request,
            }
        };

        self.save_best_effort().await;
        report
    }

    /// Spawn the push-delivery listener if the trigger uses webhooks and the
    /// event source can push. Needs a running tokio runtime.
    pub fn start_listener(self: &Arc<Self>) {
        if !domain::read(&self.config).use_webhooks {
            return;
        }
        let Some(rx) = self.collaborators.events.subscribe(&self.job) else {
            debug!(job = %self.job.full_name, "event source offers no push delivery");
            return;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(job = %self.job.full_name, error = %err, "no runtime; push delivery disabled");
                return;
            }
        };

        let task = runtime.spawn(Arc::clone(self).listen(rx));
        let mut listener = self.listener.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = listener.replace(task) {
            previous.abort();
        }
    }

    /// Whether a push-delivery listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Release background resources. In-flight pushed events are abandoned.
    pub fn stop(&self) {
        let task = self.listener.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
        obs::emit_trigger_stopped(&self.job.full_name);
    }

    /// Handle pushed events concurrently until the channel closes.
    async fn listen(self: Arc<Self>, mut rx: mpsc::Receiver<TriggerEvent>) {
        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        let this = Arc::clone(&self);
                        in_flight.spawn(async move { this.handle_pushed(event).await });
                    }
                    None => break,
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        while in_flight.join_next().await.is_some() {}
        debug!(job = %self.job.full_name, "push delivery closed");
    }

    async fn handle_pushed(&self, event: TriggerEvent) {
        let delivery = event.delivery.clone();
        if let Ok(outcome) = self.handle_event(event).await {
            if outcome.is_dispatched() {
                self.save_best_effort().await;
            }
            self.acknowledge(delivery.as_deref()).await;
        }
    }

    async fn acknowledge(&self, delivery: Option<&str>) {
        let Some(delivery) = delivery else {
            return;
        };
        if let Err(err) = self.collaborators.events.acknowledge(&self.job, delivery).await {
            obs::emit_acknowledge_failed(&self.job.full_name, delivery, &err);
        }
    }

    /// Organizations from the policy that `actor` belongs to. A failed lookup
    /// counts as "not a member".
    async fn memberships(&self, policy: &AccessPolicy<'_>, actor: &str) -> Vec<String> {
        let mut found = Vec::new();
        for org in policy.organizations() {
            match self.collaborators.orgs.is_member(org, actor).await {
                Ok(true) => {
                    found.push(org.to_string());
                    break;
                }
                Ok(false) => {}
                Err(err) => obs::emit_membership_lookup_failed(org, actor, &err),
            }
        }
        found
    }

    async fn save_best_effort(&self) {
        if let Err(err) = self.persistence.save().await {
            obs::emit_state_save_failed(&self.job.full_name, &err);
        }
    }
}

impl std::fmt::Debug for RuntimeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOrchestrator")
            .field("job", &self.job.full_name)
            .field("tracked", &self.pulls.len())
            .finish_non_exhaustive()
    }
}
