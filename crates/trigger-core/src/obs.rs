//! Structured observability hooks for trigger lifecycle events.
//!
//! Every hook logs one event with a stable `event = "..."` field so log
//! pipelines can key on it. Set `RUST_LOG` to adjust verbosity; see
//! [`crate::telemetry::init_tracing`] for JSON output.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::BuildCause;

/// Emit event: a trigger was bound to its job.
pub fn emit_trigger_started(job: &str, use_webhooks: bool) {
    info!(event = "trigger.started", job = %job, use_webhooks = use_webhooks);
}

/// Emit event: bind refused because the job has no GitHub project linkage.
pub fn emit_trigger_not_linked(job: &str) {
    warn!(event = "trigger.not_linked", job = %job, "job has no GitHub project; trigger stays unbound");
}

pub fn emit_trigger_stopped(job: &str) {
    info!(event = "trigger.stopped", job = %job);
}

/// Emit event: an event was turned away by the access policy.
pub fn emit_event_rejected(job: &str, pull_id: u64, actor: &str, reason: &dyn std::fmt::Display) {
    info!(
        event = "event.rejected",
        job = %job,
        pull_id = pull_id,
        actor = %actor,
        reason = %reason,
    );
}

/// Emit event: a build request was accepted by the scheduler.
pub fn emit_build_dispatched(job: &str, cause: &BuildCause, queue_id: Uuid) {
    info!(
        event = "build.dispatched",
        job = %job,
        pull_id = cause.pull_id,
        commit = %cause.commit,
        merged = cause.merged,
        queue_id = %queue_id,
        "{}",
        cause.short_description(),
    );
}

pub fn emit_dispatch_failed(job: &str, pull_id: u64, error: &dyn std::fmt::Display) {
    warn!(event = "build.dispatch_failed", job = %job, pull_id = pull_id, error = %error);
}

/// Emit event: an organization lookup failed and was treated as "not a member".
pub fn emit_membership_lookup_failed(org: &str, login: &str, error: &dyn std::fmt::Display) {
    warn!(event = "access.lookup_failed", org = %org, login = %login, error = %error);
}

pub fn emit_state_save_failed(scope: &str, error: &dyn std::fmt::Display) {
    warn!(event = "state.save_failed", scope = %scope, error = %error);
}

/// Emit event: one polling pass finished.
pub fn emit_poll_completed(job: &str, events: usize, dispatched: usize, rejected: usize, failed: usize) {
    info!(
        event = "poll.completed",
        job = %job,
        events = events,
        dispatched = dispatched,
        rejected = rejected,
        failed = failed,
    );
}

/// Emit event: a handled delivery could not be acknowledged and may be seen again.
pub fn emit_acknowledge_failed(job: &str, delivery: &str, error: &dyn std::fmt::Display) {
    warn!(event = "event.acknowledge_failed", job = %job, delivery = %delivery, error = %error);
}

pub fn emit_whitelist_appended(job: &str, login: &str) {
    info!(event = "whitelist.appended", job = %job, login = %login);
}

/// Emit event: a tracked pull request's build finished.
pub fn emit_build_completed(job: &str, pull_id: u64, result: &dyn std::fmt::Debug) {
    info!(event = "build.completed", job = %job, pull_id = pull_id, result = ?result);
}
