//! File-backed collaborators for the `prtrigger` binary.
//!
//! Each job maps to a file or directory named after its full name with `/`
//! replaced by `__`, so folder-qualified jobs stay one path component.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use trigger_core::domain::{
    HistoryResult, MembershipResult, SchedulerResult, SourceResult,
};
use trigger_core::{
    BuildHistory, BuildRecord, BuildRequest, EventSource, HistoryError, Job, OrgMembership,
    Scheduler, SchedulerError, SchedulingHandle, SourceError, TriggerEvent,
};

pub fn job_file_stem(job: &str) -> String {
    job.replace('/', "__")
}

/// Jobs known to the CLI, loaded from a JSON array of jobs.
#[derive(Debug, Default)]
pub struct JobCatalog {
    jobs: BTreeMap<String, Job>,
}

impl JobCatalog {
    /// A missing catalog file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read jobs catalog {:?}", path)),
        };
        let jobs: Vec<Job> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid jobs catalog {:?}", path))?;
        Ok(Self {
            jobs: jobs
                .into_iter()
                .map(|job| (job.full_name.clone(), job))
                .collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }
}

/// Build history read from `<dir>/<job>.json`, a JSON array newest first.
pub struct FileBuildHistory {
    dir: Option<PathBuf>,
}

impl FileBuildHistory {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl BuildHistory for FileBuildHistory {
    async fn builds(&self, job: &str) -> HistoryResult<Vec<BuildRecord>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let path = dir.join(format!("{}.json", job_file_stem(job)));
        let unavailable = |reason: String| HistoryError::Unavailable {
            job: job.to_string(),
            reason,
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(e.to_string())),
        };
        serde_json::from_slice(&bytes).map_err(|e| unavailable(format!("{}: {}", path.display(), e)))
    }
}

/// Events dropped as JSON files into `<spool>/<job>/`.
///
/// A poll returns every pending `*.json` file in name order, with the file
/// path as the delivery id. A file is renamed to `*.json.done` only once its
/// event is acknowledged, so an event whose dispatch failed is returned again
/// by the next poll. Files that do not parse are renamed to `*.json.bad`.
pub struct SpoolEventSource {
    dir: PathBuf,
}

impl SpoolEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn job_dir(&self, job: &Job) -> PathBuf {
        self.dir.join(job_file_stem(&job.full_name))
    }
}

async fn mark(path: &Path, suffix: &str) -> SourceResult<()> {
    let mut renamed = path.as_os_str().to_owned();
    renamed.push(".");
    renamed.push(suffix);
    tokio::fs::rename(path, &renamed)
        .await
        .map_err(|e| SourceError::Fetch(format!("{}: {}", path.display(), e)))
}

#[async_trait]
impl EventSource for SpoolEventSource {
    async fn poll(&self, job: &Job) -> SourceResult<Vec<TriggerEvent>> {
        let dir = self.job_dir(job);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::Fetch(format!("{}: {}", dir.display(), e))),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut events = Vec::with_capacity(files.len());
        for path in files {
            let parsed = tokio::fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<TriggerEvent>(&bytes).map_err(|e| e.to_string()));
            match parsed {
                Ok(event) => events.push(event.with_delivery(path.display().to_string())),
                Err(reason) => {
                    let err = SourceError::Malformed {
                        origin: path.display().to_string(),
                        reason,
                    };
                    warn!(job = %job.full_name, error = %err, "quarantining spooled event");
                    mark(&path, "bad").await?;
                }
            }
        }
        debug!(job = %job.full_name, events = events.len(), "spool read");
        Ok(events)
    }

    async fn acknowledge(&self, job: &Job, delivery: &str) -> SourceResult<()> {
        let path = Path::new(delivery);
        if path.parent() != Some(self.job_dir(job).as_path()) {
            return Err(SourceError::Malformed {
                origin: delivery.to_string(),
                reason: format!("not a spool file of job '{}'", job.full_name),
            });
        }
        mark(path, "done").await
    }
}

/// Scheduler that writes each request to `<outbox>/<queue id>.json` for an
/// external runner to pick up.
pub struct OutboxScheduler {
    dir: PathBuf,
}

impl OutboxScheduler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn write_request(dir: &Path, queue_id: Uuid, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(format!("{queue_id}.json"));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

#[async_trait]
impl Scheduler for OutboxScheduler {
    async fn schedule(&self, request: BuildRequest) -> SchedulerResult<SchedulingHandle> {
        let bytes = serde_json::to_vec_pretty(&request).map_err(|e| SchedulerError::Rejected {
            reason: e.to_string(),
        })?;
        let queue_id = Uuid::new_v4();
        let dir = self.dir.clone();
        let target = tokio::task::spawn_blocking(move || write_request(&dir, queue_id, &bytes))
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;
        debug!(job = %request.job, path = %target.display(), "build request written");
        Ok(SchedulingHandle::detached(queue_id))
    }
}

/// Organization membership from a JSON object `{ "org": ["login", ...] }`.
#[derive(Debug, Default)]
pub struct MembershipFile {
    orgs: HashMap<String, HashSet<String>>,
}

impl MembershipFile {
    /// No file means nobody belongs to any organization.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read membership file {:?}", path))?;
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid membership file {:?}", path))?;
        Ok(Self {
            orgs: raw
                .into_iter()
                .map(|(org, logins)| {
                    (
                        org.to_lowercase(),
                        logins.into_iter().map(|l| l.to_lowercase()).collect(),
                    )
                })
                .collect(),
        })
    }
}

#[async_trait]
impl OrgMembership for MembershipFile {
    async fn is_member(&self, org: &str, login: &str) -> MembershipResult<bool> {
        Ok(self
            .orgs
            .get(&org.to_lowercase())
            .is_some_and(|logins| logins.contains(&login.to_lowercase())))
    }
}
