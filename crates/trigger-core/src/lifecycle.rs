//! Binding a trigger to its job.
//!
//! A [`TriggerLifecycle`] toggles between Unbound and Bound. Binding builds a
//! fresh [`RuntimeOrchestrator`] from the persisted configuration; unbinding
//! stops and discards it.

use std::sync::{Arc, RwLock};

use crate::access;
use crate::collaborators::{Collaborators, Persistence};
use crate::domain::{self, Job, SharedConfig, SharedGlobal, TriggerResult};
use crate::obs;
use crate::orchestrator::{PollReport, RuntimeOrchestrator};
use crate::registry::PullRequestRegistry;
use trigger_state::TriggerConfig;

/// What every orchestrator of a host is built with.
#[derive(Clone)]
pub struct BindContext {
    pub registry: Arc<PullRequestRegistry>,
    pub global: SharedGlobal,
    pub collaborators: Collaborators,
    pub persistence: Arc<dyn Persistence>,
}

pub struct TriggerLifecycle {
    job_name: String,
    config: SharedConfig,
    context: BindContext,
    runtime: RwLock<Option<Arc<RuntimeOrchestrator>>>,
}

impl TriggerLifecycle {
    pub fn new(job_name: impl Into<String>, config: TriggerConfig, context: BindContext) -> Self {
        Self::with_shared_config(job_name, Arc::new(RwLock::new(config)), context)
    }

    /// A lifecycle over configuration the caller also holds (and persists).
    pub fn with_shared_config(
        job_name: impl Into<String>,
        config: SharedConfig,
        context: BindContext,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            config,
            context,
            runtime: RwLock::new(None),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn config(&self) -> TriggerConfig {
        domain::read(&self.config).clone()
    }

    /// Bind to `job`. Returns whether the trigger is now Bound.
    ///
    /// A job with no GitHub project stays Unbound. Binding again replaces the
    /// orchestrator; the old one is stopped first.
    pub fn start(&self, job: &Job) -> bool {
        let mut runtime = domain::write(&self.runtime);
        if let Some(previous) = runtime.take() {
            previous.stop();
        }

        if !job.is_linked() {
            obs::emit_trigger_not_linked(&job.full_name);
            return false;
        }

        let orchestrator = Arc::new(RuntimeOrchestrator::new(
            job.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.context.global),
            self.context.registry.get(&job.full_name),
            self.context.collaborators.clone(),
            Arc::clone(&self.context.persistence),
        ));
        orchestrator.start_listener();
        obs::emit_trigger_started(&job.full_name, domain::read(&self.config).use_webhooks);
        *runtime = Some(orchestrator);
        true
    }

    /// Unbind. No-op while Unbound.
    pub fn stop(&self) {
        if let Some(orchestrator) = domain::write(&self.runtime).take() {
            orchestrator.stop();
        }
    }

    pub fn is_bound(&self) -> bool {
        domain::read(&self.runtime).is_some()
    }

    /// The live orchestrator while Bound.
    pub fn orchestrator(&self) -> Option<Arc<RuntimeOrchestrator>> {
        domain::read(&self.runtime).clone()
    }

    /// One scheduled polling pass followed by a save. `None` while Unbound.
    ///
    /// The save is best-effort; a failure is logged and the pass still counts.
    pub async fn run(&self) -> TriggerResult<Option<PollReport>> {
        let Some(orchestrator) = self.orchestrator() else {
            return Ok(None);
        };
        let report = orchestrator.poll_once().await;
        if let Err(err) = self.context.persistence.save().await {
            obs::emit_state_save_failed(&self.job_name, &err);
        }
        report.map(Some)
    }

    /// Append `login` to the whitelist, Bound or not.
    pub async fn add_to_whitelist(&self, login: &str) {
        access::add_to_whitelist(
            &self.config,
            self.context.persistence.as_ref(),
            &self.job_name,
            login,
        )
        .await;
    }
}

impl std::fmt::Debug for TriggerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerLifecycle")
            .field("job_name", &self.job_name)
            .field("bound", &self.is_bound())
            .finish_non_exhaustive()
    }
}
