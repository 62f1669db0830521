use std::env;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing_subscriber::EnvFilter;

use tenderwatch_core::db::{self, DbPool};
use tenderwatch_core::store::{actions, announcements, parsing_logs};
use tenderwatch_core::types::AnnouncementStatus;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tenderwatch operational inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Overall lead counts by status
    Stats,
    /// List announcements in one status
    List(ListArgs),
    /// Recent pipeline runs
    Runs(RunsArgs),
    /// One manager's recent audit trail
    Actions(ActionsArgs),
}

#[derive(Args, Debug)]
struct ActionsArgs {
    #[arg(long)]
    manager: i64,
    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// pending, accepted, rejected or expired
    #[arg(long, default_value = "pending")]
    status: String,
    #[arg(long, default_value_t = 50)]
    limit: i64,
}

#[derive(Args, Debug)]
struct RunsArgs {
    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let pool = connect_pool().await?;

    match cli.command {
        Command::Stats => show_stats(&pool).await,
        Command::List(args) => list_announcements(&pool, args).await,
        Command::Runs(args) => list_runs(&pool, args).await,
        Command::Actions(args) => list_actions(&pool, args).await,
    }
}

async fn list_actions(pool: &DbPool, args: ActionsArgs) -> Result<()> {
    let rows = actions::recent_by_manager(pool, args.manager, args.limit).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["when (utc)", "announcement", "action", "comment"]);
    for action in &rows {
        table.add_row(vec![
            action.created_at.format("%d.%m.%Y %H:%M").to_string(),
            action.announcement_id.to_string(),
            action.action.as_str().to_string(),
            action.comment.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn show_stats(pool: &DbPool) -> Result<()> {
    let counts = announcements::overall_stats(pool).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["total", "pending", "accepted", "rejected", "expired", "processed"]);
    table.add_row(vec![
        counts.total.to_string(),
        counts.pending.to_string(),
        counts.accepted.to_string(),
        counts.rejected.to_string(),
        counts.expired.to_string(),
        counts.processed.to_string(),
    ]);
    println!("{table}");
    Ok(())
}

async fn list_announcements(pool: &DbPool, args: ListArgs) -> Result<()> {
    let status = AnnouncementStatus::parse(&args.status)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("unknown status")?;
    let rows = announcements::by_status(pool, status, args.limit).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "number", "region", "manager", "lots", "deadline", "created (utc)"]);
    for a in &rows {
        table.add_row(vec![
            a.id.to_string(),
            a.announcement_number.clone(),
            a.region.clone().unwrap_or_default(),
            a.assigned_manager_name.clone().unwrap_or_else(|| "—".into()),
            a.lots.0.len().max(1).to_string(),
            a.application_deadline
                .map(|d| d.format("%d.%m.%Y %H:%M").to_string())
                .unwrap_or_default(),
            a.created_at.format("%d.%m.%Y %H:%M").to_string(),
        ]);
    }
    println!("{table}");
    println!("{} announcement(s)", rows.len());
    Ok(())
}

async fn list_runs(pool: &DbPool, args: RunsArgs) -> Result<()> {
    let runs = parsing_logs::last_runs(pool, args.limit).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "started (utc)", "finished (utc)", "found", "new", "dup", "status", "error"]);
    for run in &runs {
        table.add_row(vec![
            run.id.to_string(),
            run.started_at.format("%d.%m.%Y %H:%M:%S").to_string(),
            run.finished_at
                .map(|ts| ts.format("%d.%m.%Y %H:%M:%S").to_string())
                .unwrap_or_default(),
            run.total_found.to_string(),
            run.new_added.to_string(),
            run.duplicates.to_string(),
            run.status.as_str().to_string(),
            run.error_message.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn connect_pool() -> Result<DbPool> {
    dotenvy::dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TENDERWATCH_DATABASE_URL"))
        .context("DATABASE_URL (or TENDERWATCH_DATABASE_URL) must be set")?;
    db::connect(&database_url).await
}
