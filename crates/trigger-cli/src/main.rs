//! prtrigger - pull-request build trigger CLI
//!
//! ## Commands
//!
//! - `configure`: attach a trigger configuration to a job
//! - `show`: print saved triggers and tracked pull requests
//! - `whitelist`: allow another user to trigger builds for a job
//! - `remove`: forget a job's trigger configuration
//! - `check`: evaluate the access rules for an actor and target branch
//! - `dispatch`: handle one event file end-to-end
//! - `poll`: bind every configured job and poll the spool on each job's schedule

mod adapters;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use adapters::{FileBuildHistory, JobCatalog, MembershipFile, OutboxScheduler, SpoolEventSource};
use trigger_core::telemetry::init_tracing;
use trigger_core::{AccessDecision, AccessPolicy, Collaborators, EventOutcome, TriggerEvent, TriggerHost};
use trigger_state::{FileStateStore, StateStore, SurrealStateStore, TriggerConfig};

#[derive(Parser)]
#[command(name = "prtrigger")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pull-request build trigger", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Where trigger state is kept
    #[arg(long, global = true, value_enum, default_value_t = Backend::File)]
    backend: Backend,

    /// State file for the file backend
    #[arg(long, global = true, env = "PRTRIGGER_STATE", default_value = ".prtrigger/state.json")]
    state: PathBuf,

    /// Jobs catalog (JSON array of jobs)
    #[arg(long, global = true, env = "PRTRIGGER_JOBS", default_value = ".prtrigger/jobs.json")]
    jobs: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// JSON state file
    File,
    /// SurrealDB, configured from SURREALDB_* environment variables
    Surreal,
}

/// Where the external collaborators read and write.
#[derive(clap::Args, Clone, Debug)]
struct IoArgs {
    /// Directory of build histories (`<job>.json`, newest build first)
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Directory build requests are written to
    #[arg(long, default_value = ".prtrigger/outbox")]
    outbox: PathBuf,

    /// Organization membership file (`{"org": ["login"]}`)
    #[arg(long)]
    orgs: Option<PathBuf>,

    /// Spool directory of pending events (`<job>/<name>.json`)
    #[arg(long, default_value = ".prtrigger/spool")]
    spool: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach a trigger configuration to a job, replacing any previous one
    Configure {
        /// Full job name
        job: String,

        /// Administrators (repeatable)
        #[arg(long = "admin")]
        admins: Vec<String>,

        /// Whitelisted users (repeatable)
        #[arg(long = "whitelist")]
        whitelist: Vec<String>,

        /// Organizations whose members may trigger builds (repeatable)
        #[arg(long = "org")]
        orgs: Vec<String>,

        /// Polling schedule (defaults to the global schedule)
        #[arg(long, default_value = "")]
        cron: String,

        /// Phrase that requests a build
        #[arg(long, default_value = "")]
        trigger_phrase: String,

        /// Only build when the trigger phrase is seen
        #[arg(long)]
        only_trigger_phrase: bool,

        /// Events are pushed by webhook
        #[arg(long)]
        use_webhooks: bool,

        /// Anyone may trigger builds
        #[arg(long)]
        permit_all: bool,

        /// Close pull requests whose build failed (defaults to the global setting)
        #[arg(long)]
        auto_close: Option<bool>,

        /// Allowed target branches, exact or `*` globs (repeatable)
        #[arg(long = "target-branch")]
        target_branches: Vec<String>,
    },

    /// Print saved triggers and tracked pull requests
    Show {
        /// Only this job
        job: Option<String>,
    },

    /// Allow another user to trigger builds for a job
    Whitelist {
        job: String,
        login: String,
    },

    /// Forget a job's trigger configuration; its tracked pull requests are kept
    Remove {
        job: String,
    },

    /// Evaluate the access rules of a job for an actor
    Check {
        job: String,

        /// Actor login
        actor: String,

        /// Organizations the actor belongs to (repeatable)
        #[arg(long = "member-of")]
        member_of: Vec<String>,

        /// Target branch of the pull request
        #[arg(long, default_value = "")]
        target: String,
    },

    /// Handle one event file end-to-end
    Dispatch {
        job: String,

        /// Event file (JSON)
        #[arg(long)]
        event: PathBuf,

        #[command(flatten)]
        io: IoArgs,
    },

    /// Bind every configured job and poll the spool on each job's schedule
    Poll {
        /// Run a single pass per job and exit
        #[arg(long)]
        once: bool,

        /// Override every job's schedule with a fixed interval in seconds
        #[arg(long)]
        interval_secs: Option<u64>,

        #[command(flatten)]
        io: IoArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let store = open_store(cli.backend, &cli.state).await?;

    match cli.command {
        Commands::Configure {
            job,
            admins,
            whitelist,
            orgs,
            cron,
            trigger_phrase,
            only_trigger_phrase,
            use_webhooks,
            permit_all,
            auto_close,
            target_branches,
        } => {
            let config = TriggerConfig {
                admin_list: admins.join(" "),
                whitelist: whitelist.join(" "),
                org_list: orgs.join(" "),
                cron,
                trigger_phrase,
                only_trigger_phrase,
                use_webhooks,
                permit_all,
                auto_close_failed_pull_requests: auto_close,
                target_branches,
            };
            cmd_configure(store, &job, config).await
        }
        Commands::Show { job } => cmd_show(store, job.as_deref(), cli.json).await,
        Commands::Whitelist { job, login } => cmd_whitelist(store, &job, &login).await,
        Commands::Remove { job } => cmd_remove(store, &job).await,
        Commands::Check {
            job,
            actor,
            member_of,
            target,
        } => cmd_check(store, &job, &actor, &member_of, &target).await,
        Commands::Dispatch { job, event, io } => {
            let catalog = JobCatalog::load(&cli.jobs)?;
            cmd_dispatch(store, &catalog, &job, &event, &io).await
        }
        Commands::Poll {
            once,
            interval_secs,
            io,
        } => {
            let catalog = JobCatalog::load(&cli.jobs)?;
            cmd_poll(store, &catalog, &io, once, interval_secs.map(Duration::from_secs)).await
        }
    }
}

async fn open_store(backend: Backend, state: &Path) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match backend {
        Backend::File => Arc::new(FileStateStore::new(state)),
        Backend::Surreal => Arc::new(
            SurrealStateStore::from_env()
                .await
                .context("Failed to connect to trigger state database")?,
        ),
    };
    Ok(store)
}

/// Collaborators for commands that never poll or dispatch.
fn offline_collaborators() -> Collaborators {
    Collaborators::new(
        Arc::new(OutboxScheduler::new(".prtrigger/outbox")),
        Arc::new(FileBuildHistory::new(None)),
        Arc::new(MembershipFile::default()),
        Arc::new(SpoolEventSource::new(".prtrigger/spool")),
    )
}

fn collaborators(io: &IoArgs) -> Result<Collaborators> {
    Ok(Collaborators::new(
        Arc::new(OutboxScheduler::new(&io.outbox)),
        Arc::new(FileBuildHistory::new(io.history_dir.clone())),
        Arc::new(MembershipFile::load(io.orgs.as_deref())?),
        Arc::new(SpoolEventSource::new(&io.spool)),
    ))
}

/// Attach a trigger configuration to a job
async fn cmd_configure(store: Arc<dyn StateStore>, job: &str, config: TriggerConfig) -> Result<()> {
    let host = TriggerHost::load(store, offline_collaborators()).await?;
    host.configure(job, config);
    host.save().await.context("Failed to save trigger state")?;
    println!("Configured trigger for '{}'", job);
    Ok(())
}

/// Print saved triggers and tracked pull requests
async fn cmd_show(store: Arc<dyn StateStore>, job: Option<&str>, json: bool) -> Result<()> {
    let mut state = store.load().await?.unwrap_or_default();
    if let Some(job) = job {
        state.triggers.retain(|name, _| name == job);
        state.pull_requests.retain(|name, _| name == job);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    if state.triggers.is_empty() {
        println!("No triggers configured.");
    }
    for (name, config) in &state.triggers {
        println!("{}", name);
        println!("  admins:    {}", config.admin_list);
        println!("  whitelist: {}", config.whitelist);
        println!("  orgs:      {}", config.org_list);
        println!("  cron:      {}", config.effective_cron(&state.global));
        println!("  webhooks:  {}", config.use_webhooks);
        println!("  permitAll: {}", config.permit_all);
        println!("  autoClose: {}", config.effective_auto_close(&state.global));
        if !config.target_branches.is_empty() {
            println!("  branches:  {}", config.target_branches.join(", "));
        }
        for (pull_id, pr) in state.pull_requests.get(name).into_iter().flatten() {
            println!(
                "  #{:<5} {:<10} {} ({} -> {})",
                pull_id,
                format!("{:?}", pr.last_result),
                short_sha(&pr.last_commit_sha),
                pr.source_branch,
                pr.target_branch
            );
        }
    }
    Ok(())
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(12).collect()
}

/// Allow another user to trigger builds for a job
async fn cmd_whitelist(store: Arc<dyn StateStore>, job: &str, login: &str) -> Result<()> {
    let host = TriggerHost::load(store, offline_collaborators()).await?;
    host.add_to_whitelist(job, login).await?;
    // The append itself only logs a failed save; surface it here.
    host.save().await.context("Failed to save trigger state")?;
    println!("Whitelisted '{}' for '{}'", login, job);
    Ok(())
}

/// Forget a job's trigger configuration
async fn cmd_remove(store: Arc<dyn StateStore>, job: &str) -> Result<()> {
    let host = TriggerHost::load(store, offline_collaborators()).await?;
    if host.remove(job).is_none() {
        bail!("No trigger configured for '{}'", job);
    }
    host.save().await.context("Failed to save trigger state")?;
    println!("Removed trigger for '{}'", job);
    Ok(())
}

/// Evaluate the access rules of a job for an actor
async fn cmd_check(
    store: Arc<dyn StateStore>,
    job: &str,
    actor: &str,
    member_of: &[String],
    target: &str,
) -> Result<()> {
    let state = store.load().await?.unwrap_or_default();
    let Some(config) = state.triggers.get(job) else {
        bail!("No trigger configured for '{}'", job);
    };
    match AccessPolicy::new(config).evaluate(actor, member_of, target) {
        AccessDecision::Allowed(grant) => println!("allowed ({:?})", grant),
        AccessDecision::Denied(denial) => println!("denied: {}", denial),
    }
    Ok(())
}

/// Handle one event file end-to-end
async fn cmd_dispatch(
    store: Arc<dyn StateStore>,
    catalog: &JobCatalog,
    job: &str,
    event_path: &Path,
    io: &IoArgs,
) -> Result<()> {
    let content = std::fs::read_to_string(event_path)
        .with_context(|| format!("Failed to read event file {:?}", event_path))?;
    let event: TriggerEvent = serde_json::from_str(&content)
        .with_context(|| format!("Invalid event in {:?}", event_path))?;
    let Some(definition) = catalog.get(job) else {
        bail!("Job '{}' is not in the jobs catalog", job);
    };

    let host = TriggerHost::load(store, collaborators(io)?).await?;
    if !host.bind(definition)? {
        bail!("Job '{}' has no GitHub project; trigger not bound", job);
    }

    let outcome = host.handle_event(job, event).await;
    host.shutdown();
    match outcome? {
        EventOutcome::Dispatched { grant, handle } => {
            println!("dispatched ({:?}) as {}", grant, handle.queue_id);
        }
        EventOutcome::Rejected(denial) => println!("rejected: {}", denial),
    }
    Ok(())
}

/// Bind every configured job and poll on its schedule
async fn cmd_poll(
    store: Arc<dyn StateStore>,
    catalog: &JobCatalog,
    io: &IoArgs,
    once: bool,
    interval_override: Option<Duration>,
) -> Result<()> {
    let host = Arc::new(TriggerHost::load(store, collaborators(io)?).await?);
    let global = host.global();

    let mut schedules = Vec::new();
    for job in catalog.jobs() {
        let Some(config) = host.config(&job.full_name) else {
            continue;
        };
        if host.bind(job)? {
            let interval = interval_override
                .unwrap_or_else(|| cron_interval(config.effective_cron(&global)));
            schedules.push((job.full_name.clone(), interval));
        }
    }
    if schedules.is_empty() {
        bail!("No configured job in the catalog could be bound");
    }

    if once {
        for (job, _) in &schedules {
            run_pass(&host, job).await;
        }
        host.shutdown();
        return Ok(());
    }

    let mut tasks = tokio::task::JoinSet::new();
    for (job, interval) in schedules {
        let host = Arc::clone(&host);
        info!(job = %job, interval_secs = interval.as_secs(), "polling");
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                run_pass(&host, &job).await;
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutting down");
    tasks.shutdown().await;
    host.shutdown();
    if let Err(e) = host.save().await {
        warn!(error = %e, "final save failed");
    }
    Ok(())
}

async fn run_pass(host: &TriggerHost, job: &str) {
    match host.run(job).await {
        Ok(Some(report)) if !report.skipped => println!(
            "{}: {} events, {} dispatched, {} rejected, {} failed",
            job, report.events, report.dispatched, report.rejected, report.failed
        ),
        Ok(_) => {}
        Err(e) => warn!(job = %job, error = %e, "polling pass failed"),
    }
}

/// Polling interval for a cron spec.
///
/// Only the minute field is interpreted: `*` is every minute and `*/N` or
/// `H/N` every N minutes. Anything else polls every five minutes.
fn cron_interval(spec: &str) -> Duration {
    const DEFAULT: Duration = Duration::from_secs(5 * 60);
    let minute = spec.split_whitespace().next().unwrap_or_default();
    let minutes = match minute {
        "*" => Some(1),
        other => other
            .strip_prefix("*/")
            .or_else(|| other.strip_prefix("H/"))
            .and_then(|step| step.parse::<u64>().ok())
            .filter(|step| *step > 0),
    };
    match minutes {
        Some(m) => Duration::from_secs(m * 60),
        None => {
            warn!(cron = %spec, "unsupported schedule; polling every 5 minutes");
            DEFAULT
        }
    }
}
