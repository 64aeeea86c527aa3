//! Strata migration command-line tool
//!
//! Applies, rolls back and inspects the incident-analytics schema of a
//! PostgreSQL database.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use strata_core::{MigrationError, MigrationReport, MigrationRunner, RunError, RunnerConfig};
use strata_pg::{PgSchemaStore, migrations};

/// Exit code for failures that may succeed when retried (`EX_TEMPFAIL`).
const EXIT_RETRYABLE: u8 = 75;
/// Exit code when `verify` finds drift.
const EXIT_DRIFT: u8 = 2;

/// Strata migration tool
#[derive(Parser, Debug)]
#[command(name = "strata-migrate")]
#[command(version, about = "Apply and roll back the incident schema migrations")]
struct Args {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Pool size. The migration lock keeps one connection busy, so at least two are needed.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(2..))]
    max_connections: u32,

    /// Budget in seconds for metadata reads and ledger writes
    #[arg(long, default_value_t = 10)]
    metadata_timeout_secs: u64,

    /// Budget in seconds for executing and committing one migration
    #[arg(long, default_value_t = 30)]
    ddl_timeout_secs: u64,

    /// How long to wait in seconds for another runner to release the lock
    #[arg(long, default_value_t = 60)]
    lock_timeout_secs: u64,

    /// Log filter, in `env_logger` syntax
    #[arg(long, env = "STRATA_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply all pending migrations
    Up,
    /// Roll back to the given version
    Down {
        /// Target version; 0 rolls back everything
        #[arg(long = "to", allow_negative_numbers = true)]
        to: i64,
    },
    /// Print the current migration status as JSON
    Status,
    /// Compare the ledger with the objects present in the database
    Verify,
    /// Roll back everything, then apply all migrations again
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

impl Args {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            metadata_timeout: Duration::from_secs(self.metadata_timeout_secs),
            ddl_timeout: Duration::from_secs(self.ddl_timeout_secs),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            ..RunnerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(args.metadata_timeout_secs))
        .connect(&args.database_url)
        .await
        .context("Failed to connect to the database")?;

    let store =
        PgSchemaStore::new(pool).with_statement_timeout(Duration::from_secs(args.ddl_timeout_secs));
    let runner = MigrationRunner::with_config(store, migrations::catalog(), args.runner_config());

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the current migration");
            cancel.cancel();
        }
    });

    match args.command {
        Command::Up => {
            let report = runner.apply_all().await.context("Migration failed")?;
            print_report(&report, "Applied");
        }
        Command::Down { to } => {
            let report = runner.rollback_to(to).await.context("Rollback failed")?;
            print_report(&report, "Rolled back");
            println!("Rollback to version {} completed successfully", to);
        }
        Command::Status => {
            let status = runner
                .status()
                .await
                .context("Failed to get migration status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Verify => {
            let drift = runner.verify().await.context("Failed to verify schema")?;
            if drift.is_empty() {
                println!("Schema matches the ledger");
            } else {
                println!("{}", serde_json::to_string_pretty(&drift)?);
                return Ok(ExitCode::from(EXIT_DRIFT));
            }
        }
        Command::Reset { yes } => {
            let prompt = "Roll back every migration and apply them again? (y/N): ";
            if !yes && !confirm(prompt)? {
                println!("Reset cancelled");
                return Ok(ExitCode::SUCCESS);
            }
            let down = runner.rollback_to(0).await.context("Reset rollback failed")?;
            print_report(&down, "Rolled back");
            let up = runner.apply_all().await.context("Reset apply failed")?;
            print_report(&up, "Applied");
            println!("Database reset completed successfully");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &MigrationReport, verb: &str) {
    if report.is_noop() {
        println!("Nothing to do, database is at the requested version");
    } else {
        println!(
            "{} {} migrations {:?} in {:.2?}",
            verb,
            report.completed.len(),
            report.completed,
            report.elapsed
        );
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    Ok(matches!(response.trim(), "y" | "Y"))
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let retryable = if let Some(run) = err.downcast_ref::<RunError>() {
        run.is_retryable()
    } else if let Some(migration) = err.downcast_ref::<MigrationError>() {
        migration.is_retryable()
    } else if let Some(db_err) = err.downcast_ref::<sqlx::Error>() {
        matches!(
            db_err,
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut
        )
    } else {
        false
    };

    if retryable { EXIT_RETRYABLE } else { 1 }
}
