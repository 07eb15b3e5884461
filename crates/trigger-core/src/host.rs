//! The process-owned trigger host.
//!
//! Holds the global settings, every job's trigger configuration, and the
//! pull-request registry; loads them at startup and saves them as one unit.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use crate::collaborators::{Collaborators, Persistence};
use crate::domain::{self, Job, SharedConfig, SharedGlobal, TriggerError, TriggerEvent, TriggerResult};
use crate::lifecycle::{BindContext, TriggerLifecycle};
use crate::obs;
use crate::orchestrator::{EventOutcome, PollReport};
use crate::registry::PullRequestRegistry;
use trigger_state::{GlobalConfig, PersistedState, StateStore, StorageResult, TriggerConfig};

/// Everything that is saved, and the store it is saved to.
struct HostState {
    store: Arc<dyn StateStore>,
    global: SharedGlobal,
    registry: Arc<PullRequestRegistry>,
    configs: RwLock<BTreeMap<String, SharedConfig>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl HostState {
    fn snapshot(&self) -> PersistedState {
        let triggers = domain::read(&self.configs)
            .iter()
            .map(|(job, config)| (job.clone(), domain::read(config).clone()))
            .collect();
        PersistedState {
            global: domain::read(&self.global).clone(),
            triggers,
            pull_requests: self.registry.snapshot(),
        }
    }
}

#[async_trait]
impl Persistence for HostState {
    async fn save(&self) -> StorageResult<()> {
        // Saves are serialized so an older snapshot never lands after a newer one.
        let _guard = self.save_lock.lock().await;
        let state = self.snapshot();
        self.store.save(&state).await
    }
}

pub struct TriggerHost {
    state: Arc<HostState>,
    collaborators: Collaborators,
    triggers: RwLock<BTreeMap<String, Arc<TriggerLifecycle>>>,
}

impl TriggerHost {
    /// Load saved state from `store`, or start empty on first run.
    ///
    /// Every configured trigger comes back Unbound; call [`TriggerHost::bind`].
    pub async fn load(store: Arc<dyn StateStore>, collaborators: Collaborators) -> TriggerResult<Self> {
        let persisted = match store.load().await? {
            Some(state) => {
                info!(
                    triggers = state.triggers.len(),
                    tracked = state.tracked_count(),
                    "trigger state loaded"
                );
                state
            }
            None => {
                info!("no saved trigger state; starting fresh");
                PersistedState::default()
            }
        };

        let state = Arc::new(HostState {
            store,
            global: Arc::new(RwLock::new(persisted.global)),
            registry: Arc::new(PullRequestRegistry::from_persisted(persisted.pull_requests)),
            configs: RwLock::new(BTreeMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        });
        let host = Self {
            state,
            collaborators,
            triggers: RwLock::new(BTreeMap::new()),
        };
        for (job, config) in persisted.triggers {
            host.install(job, config);
        }
        Ok(host)
    }

    /// Attach `config` to `job`, replacing any previous configuration wholesale.
    ///
    /// The previous trigger is stopped; the new one starts Unbound.
    pub fn configure(&self, job: &str, config: TriggerConfig) -> Arc<TriggerLifecycle> {
        if let Some(previous) = domain::read(&self.triggers).get(job) {
            previous.stop();
        }
        self.install(job.to_string(), config)
    }

    /// Bind the configured trigger of `job.full_name`. Returns whether it is now Bound.
    pub fn bind(&self, job: &Job) -> TriggerResult<bool> {
        Ok(self.lifecycle(&job.full_name)?.start(job))
    }

    pub fn unbind(&self, job: &str) -> TriggerResult<()> {
        self.lifecycle(job)?.stop();
        Ok(())
    }

    /// Stop and forget the trigger of `job`. Tracked pull requests stay in the registry.
    pub fn remove(&self, job: &str) -> Option<TriggerConfig> {
        let lifecycle = domain::write(&self.triggers).remove(job);
        if let Some(lifecycle) = &lifecycle {
            lifecycle.stop();
        }
        let config = domain::write(&self.state.configs).remove(job)?;
        let removed = domain::read(&config).clone();
        Some(removed)
    }

    /// The bound trigger of `job`, if any.
    pub fn trigger(&self, job: &str) -> Option<Arc<TriggerLifecycle>> {
        domain::read(&self.triggers)
            .get(job)
            .filter(|lifecycle| lifecycle.is_bound())
            .cloned()
    }

    /// Hand one event to the bound trigger of `job`; saves after a dispatch.
    pub async fn handle_event(&self, job: &str, event: TriggerEvent) -> TriggerResult<EventOutcome> {
        let lifecycle = self.lifecycle(job)?;
        let orchestrator = lifecycle.orchestrator().ok_or_else(|| TriggerError::NotBound {
            job: job.to_string(),
        })?;
        let outcome = orchestrator.handle_event(event).await?;
        if outcome.is_dispatched() {
            self.save_best_effort(job).await;
        }
        Ok(outcome)
    }

    /// One polling pass for `job`. `None` while the trigger is Unbound.
    pub async fn run(&self, job: &str) -> TriggerResult<Option<PollReport>> {
        self.lifecycle(job)?.run().await
    }

    pub async fn add_to_whitelist(&self, job: &str, login: &str) -> TriggerResult<()> {
        self.lifecycle(job)?.add_to_whitelist(login).await;
        Ok(())
    }

    /// Save everything now, surfacing any failure.
    pub async fn save(&self) -> TriggerResult<()> {
        self.state.save().await?;
        Ok(())
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.snapshot()
    }

    pub fn global(&self) -> GlobalConfig {
        domain::read(&self.state.global).clone()
    }

    pub fn set_global(&self, global: GlobalConfig) {
        *domain::write(&self.state.global) = global;
    }

    pub fn config(&self, job: &str) -> Option<TriggerConfig> {
        domain::read(&self.state.configs)
            .get(job)
            .map(|config| domain::read(config).clone())
    }

    pub fn registry(&self) -> Arc<PullRequestRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn job_names(&self) -> Vec<String> {
        domain::read(&self.triggers).keys().cloned().collect()
    }

    /// Stop every trigger.
    pub fn shutdown(&self) {
        for lifecycle in domain::read(&self.triggers).values() {
            lifecycle.stop();
        }
    }

    fn install(&self, job: String, config: TriggerConfig) -> Arc<TriggerLifecycle> {
        let shared: SharedConfig = Arc::new(RwLock::new(config));
        let context = BindContext {
            registry: Arc::clone(&self.state.registry),
            global: Arc::clone(&self.state.global),
            collaborators: self.collaborators.clone(),
            persistence: self.state.clone(),
        };
        let lifecycle = Arc::new(TriggerLifecycle::with_shared_config(
            job.clone(),
            Arc::clone(&shared),
            context,
        ));
        domain::write(&self.state.configs).insert(job.clone(), shared);
        domain::write(&self.triggers).insert(job, Arc::clone(&lifecycle));
        lifecycle
    }

    fn lifecycle(&self, job: &str) -> TriggerResult<Arc<TriggerLifecycle>> {
        domain::read(&self.triggers)
            .get(job)
            .cloned()
            .ok_or_else(|| TriggerError::UnknownJob {
                job: job.to_string(),
            })
    }

    async fn save_best_effort(&self, scope: &str) {
        if let Err(err) = self.state.save().await {
            obs::emit_state_save_failed(scope, &err);
        }
    }
}

impl std::fmt::Debug for TriggerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHost")
            .field("jobs", &self.job_names())
            .finish_non_exhaustive()
    }
}
