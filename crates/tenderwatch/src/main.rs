use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tenderwatch_core::config::{AppConfig, RoleTable};
use tenderwatch_core::db::{self, DbPool};
use tenderwatch_core::mirror::NullMirror;
use tenderwatch_core::notifier::Notifier;
use tenderwatch_core::pipeline::ParsePipeline;
use tenderwatch_core::reminders::DeadlineScheduler;
use tenderwatch_core::transport::TracingTransport;
use tenderwatch_source::PortalClient;

#[derive(Parser, Debug)]
#[command(author, version, about = "Procurement lead monitoring and distribution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitoring service: parse, reminder and redelivery jobs
    Serve,
    /// Run database migrations
    Migrate,
    /// Run a single assignment-pipeline pass and exit
    ParseOnce,
    /// Run a single deadline sweep and exit
    SweepOnce,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::Migrate => {
            let pool = connect_pool().await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::ParseOnce => {
            let system = System::build().await?;
            let summary = system.pipeline.run_once().await?;
            info!(
                total = summary.total_found,
                new = summary.new_added,
                duplicates = summary.duplicates,
                "parse pass finished"
            );
            Ok(())
        }
        Command::SweepOnce => {
            let system = System::build().await?;
            let summary = system.deadlines.run_once().await?;
            info!(
                skipped_quiet = summary.skipped_quiet,
                expired = summary.expired,
                reminders = summary.reminders_sent,
                "deadline sweep finished"
            );
            Ok(())
        }
    }
}

struct System {
    config: Arc<AppConfig>,
    pipeline: Arc<ParsePipeline>,
    deadlines: Arc<DeadlineScheduler>,
}

impl System {
    async fn build() -> Result<Self> {
        let config = Arc::new(AppConfig::load().context("loading configuration")?);
        let roles = Arc::new(config.role_table());
        let pool = connect_pool().await?;
        db::run_migrations(&pool).await?;
        Ok(Self::wire(pool, config, roles)?)
    }

    fn wire(pool: DbPool, config: Arc<AppConfig>, roles: Arc<RoleTable>) -> Result<Self> {
        // The chat transport adapter is deployment glue; until one is wired
        // in, outbound traffic goes to the structured log.
        let transport = Arc::new(TracingTransport);
        let mirror = Arc::new(NullMirror);
        let notifier = Arc::new(Notifier::new(
            transport,
            config.admin_chat_id,
            config.coordinator_chat_id,
        ));
        let source = Arc::new(
            PortalClient::new(&config.source).context("building portal client")?,
        );

        let pipeline = Arc::new(ParsePipeline::new(
            pool.clone(),
            config.clone(),
            roles.clone(),
            source,
            notifier.clone(),
            mirror,
        ));
        let deadlines = Arc::new(DeadlineScheduler::new(pool, config.clone(), roles, notifier));

        Ok(Self {
            config,
            pipeline,
            deadlines,
        })
    }
}

async fn serve() -> Result<()> {
    let system = System::build().await?;
    info!(
        operators = system.config.operators.len(),
        parse_interval_minutes = system.config.parse_interval_minutes,
        "starting tenderwatch"
    );

    // First pass immediately on startup, then on the schedule.
    if let Err(err) = system.pipeline.run_once().await {
        error!(error = %err, "initial parse pass failed");
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    {
        let pipeline = system.pipeline.clone();
        let running = Arc::new(Mutex::new(()));
        let interval = Duration::from_secs(system.config.parse_interval_minutes * 60);
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            let running = running.clone();
            Box::pin(async move {
                // Skip the tick when the previous run is still going.
                let Ok(_guard) = running.try_lock() else {
                    warn!("parse run still in progress, skipping tick");
                    return;
                };
                if let Err(err) = pipeline.run_once().await {
                    error!(error = %err, "scheduled parse run failed");
                }
            })
        })
        .context("creating parse job")?;
        sched.add(job).await.context("adding parse job")?;
    }

    {
        let deadlines = system.deadlines.clone();
        let running = Arc::new(Mutex::new(()));
        let interval = Duration::from_secs(system.config.reminder_interval_minutes * 60);
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let deadlines = deadlines.clone();
            let running = running.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!("deadline sweep still in progress, skipping tick");
                    return;
                };
                if let Err(err) = deadlines.run_once().await {
                    error!(error = %err, "scheduled deadline sweep failed");
                }
            })
        })
        .context("creating deadline job")?;
        sched.add(job).await.context("adding deadline job")?;
    }

    {
        let pipeline = system.pipeline.clone();
        let running = Arc::new(Mutex::new(()));
        let interval = Duration::from_secs(system.config.retry_interval_minutes * 60);
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            let running = running.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!("redelivery sweep still in progress, skipping tick");
                    return;
                };
                if let Err(err) = pipeline.resend_unnotified().await {
                    error!(error = %err, "scheduled redelivery sweep failed");
                }
            })
        })
        .context("creating redelivery job")?;
        sched.add(job).await.context("adding redelivery job")?;
    }

    sched.start().await.context("starting scheduler")?;
    info!("scheduler started, waiting for shutdown signal");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    Ok(())
}

async fn connect_pool() -> Result<DbPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .or_else(|_| std::env::var("TENDERWATCH_DATABASE_URL"))
        .context("DATABASE_URL (or TENDERWATCH_DATABASE_URL) must be set")?;
    db::connect(&database_url).await
}
