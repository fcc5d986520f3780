use std::collections::HashSet;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use shelfguard::audit::{AuditLogService, AuditRecorder, AuditStore};
use shelfguard::{db, roles, telemetry};

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Parser, Debug)]
#[command(author, version, about = "shelfguard maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show which embedded migrations the database has applied
    MigrateStatus,
    /// Reconcile the canonical Admin/Staff/User roles
    SeedRoles,
    /// Delete audit entries older than the given number of days
    PurgeAudit {
        #[arg(long)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::load_env();
    telemetry::init_tracing("warn,shelfguard=info");

    let cli = Cli::parse();
    let pool = connect().await?;

    match cli.command {
        Commands::MigrateRun => {
            db::migrate(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => print_status(&pool).await?,
        Commands::SeedRoles => {
            let report = roles::ensure_canonical_roles(&pool)
                .await
                .context("role reconciliation failed")?;
            if let Some(reason) = &report.rebuilt {
                println!("rebuilt roles table ({reason})");
            }
            for index in &report.dropped_indexes {
                println!("dropped legacy index {index}");
            }
            if report.created.is_empty() {
                println!("Canonical roles already present");
            } else {
                println!("Created roles: {}", report.created.join(", "));
            }
        }
        Commands::PurgeAudit { days } => {
            // the purge writes its own entry synchronously, so no writer task is needed
            let (recorder, _rx) = AuditRecorder::new(AuditStore::new(pool.clone()), 1);
            let report = AuditLogService::new(pool, recorder)
                .purge_older_than(days, None)
                .await
                .context("audit purge failed")?;
            println!(
                "Deleted {} audit entries older than {} days (cutoff {})",
                report.deleted,
                report.days,
                report.cutoff.to_rfc3339()
            );
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .with_context(|| format!("failed to connect to {database_url}"))
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    let tracked: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;

    let applied: HashSet<i64> = match tracked {
        Some(_) => sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect(),
        None => HashSet::new(),
    };

    println!("{:<8} {:<16} Description", "Status", "Version");
    for migration in MIGRATOR.iter() {
        let status = if applied.contains(&migration.version) { "applied" } else { "pending" };
        println!("{:<8} {:<16} {}", status, migration.version, migration.description.trim());
    }

    Ok(())
}
