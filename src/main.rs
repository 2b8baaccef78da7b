//! Pipeline CLI entry point.
//!
//! Exit codes: 0 success, 1 partial failure, 2 configuration error,
//! 3 CRM schema preflight failed, 4 store error.

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use migration::{Migrator, MigratorTrait};
use prospector::config::ConfigLoader;
use prospector::error::PipelineError;
use prospector::pipeline::Pipeline;
use prospector::telemetry;

#[derive(Parser)]
#[command(name = "prospector")]
#[command(about = "Prospect-discovery signal pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run collectors against their sources
    Collect {
        /// Comma-separated collector names; default: all registered
        #[arg(long, value_delimiter = ',')]
        collectors: Option<Vec<String>>,
        /// Check and count but write nothing
        #[arg(long)]
        dry_run: bool,
        /// Override the configured lookback window
        #[arg(long)]
        lookback_days: Option<i64>,
    },
    /// Push pending signals through the gate into the CRM
    Process {
        /// Cap on pending signals per batch
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh the suppression cache from the CRM
    Sync {
        /// Override the configured cache TTL
        #[arg(long)]
        ttl_days: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// sync, then collect, then process
    Full {
        #[arg(long, value_delimiter = ',')]
        collectors: Option<Vec<String>>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        lookback_days: Option<i64>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// Dump signal store statistics
    Stats,
    /// Check store, sources, and CRM schema
    Health {
        #[arg(long)]
        json: bool,
    },
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::new().load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    telemetry::init_tracing(&config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let exit_code = match run(cli.command, config, cancel).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{err}");
            err.exit_code()
        }
    };

    std::process::exit(exit_code);
}

async fn run(
    command: Commands,
    config: prospector::config::AppConfig,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let command = match command {
        Commands::Migrate { action } => return migrate(&config, action).await,
        other => other,
    };

    let mut pipeline = Pipeline::initialize(config, cancel).await?;

    match command {
        Commands::Collect {
            collectors,
            dry_run,
            lookback_days,
        } => {
            let results = pipeline.collect(collectors, dry_run, lookback_days).await?;
            print_json(&results);
            let failed: Vec<_> = results.iter().filter(|r| !r.errors.is_empty()).collect();
            if !failed.is_empty() {
                return Err(PipelineError::Partial(format!(
                    "{} collector(s) reported errors",
                    failed.len()
                )));
            }
            Ok(())
        }
        Commands::Process { limit, dry_run } => {
            let batch = pipeline.process(limit, dry_run).await?;
            print_json(&batch);
            if batch.has_errors() {
                return Err(PipelineError::Partial(format!(
                    "{} prospect(s) failed to upsert",
                    batch.error_messages.len()
                )));
            }
            Ok(())
        }
        Commands::Sync { ttl_days, dry_run } => {
            let stats = pipeline.sync(ttl_days, dry_run).await?;
            print_json(&stats);
            Ok(())
        }
        Commands::Full {
            collectors,
            dry_run,
            lookback_days,
            limit,
            ttl_days,
        } => {
            let report = pipeline
                .full(collectors, dry_run, lookback_days, limit, ttl_days)
                .await?;
            print_json(&report);
            match report.failure() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        Commands::Stats => {
            let stats = pipeline.stats().await?;
            print_json(&stats);
            Ok(())
        }
        Commands::Health { json } => {
            let report = pipeline.health().await;
            if json {
                print_json(&report);
            } else {
                println!("store: {}", if report.store_ok { "ok" } else { "FAILED" });
                for source in &report.sources {
                    match (source.ok, source.detail.as_deref()) {
                        (true, None) => println!("source {}: ok", source.source),
                        (true, Some(detail)) => println!("source {}: ok ({detail})", source.source),
                        (false, detail) => println!(
                            "source {}: FAILED ({})",
                            source.source,
                            detail.unwrap_or("unknown")
                        ),
                    }
                }
                if let Some(valid) = report.crm_schema_valid {
                    println!("crm schema: {}", if valid { "ok" } else { "INVALID" });
                    if !valid {
                        if let Some(detail) = &report.crm_schema_report {
                            println!("{detail}");
                        }
                    }
                }
            }
            if report.healthy() {
                Ok(())
            } else {
                Err(PipelineError::Partial("health check failed".to_string()))
            }
        }
        Commands::Migrate { .. } => unreachable!("handled above"),
    }
}

async fn migrate(
    config: &prospector::config::AppConfig,
    action: MigrateAction,
) -> Result<(), PipelineError> {
    let conn = prospector::db::init_store(config)
        .await
        .map_err(|e| PipelineError::Config(format!("store init failed: {e}")))?;

    let result = match action {
        MigrateAction::Up => Migrator::up(&conn, None).await.map(|_| {
            println!("all migrations applied");
        }),
        MigrateAction::Down => Migrator::down(&conn, Some(1)).await.map(|_| {
            println!("last migration rolled back");
        }),
        MigrateAction::Status => {
            let applied = Migrator::get_applied_migrations(&conn)
                .await
                .map_err(prospector::error::StoreError::from)?;
            let pending = Migrator::get_pending_migrations(&conn)
                .await
                .map_err(prospector::error::StoreError::from)?;
            println!("applied: {} migration(s)", applied.len());
            println!("pending: {} migration(s)", pending.len());
            Ok(())
        }
    };

    result.map_err(|e| PipelineError::Store(prospector::error::StoreError::Database(e)))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to render output: {err}"),
    }
}
