//! Table Gateway - Main entry point.
//!
//! Runs one SQL statement through a pooled connection. Query rows are printed
//! to stdout as JSON lines; logs go to stderr.

use std::io::Write;
use table_gateway::config::Config;
use table_gateway::models::masked_connection_string;
use table_gateway::{Database, DatabaseOptions, DbError, DbResult};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!(
        database = %masked_connection_string(&config.database),
        "Starting table-gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_config = config.database_config()?;
    let db = Database::with_options(
        db_config,
        DatabaseOptions {
            guard_full_table_mutations: config.guard_full_table,
        },
    )?;

    let result = run(&db, &config).await;
    db.close().await;

    if let Err(e) = result {
        error!(error = %e, "Statement failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }

    Ok(())
}

async fn run(db: &Database, config: &Config) -> DbResult<()> {
    if config.execute {
        let rows_affected = db.execute_raw(&config.sql, &[]).await?;
        let line = serde_json::json!({ "rows_affected": rows_affected });
        return write_lines(std::iter::once(line.to_string()));
    }

    let rows = db.query_raw(&config.sql).await?;
    let lines = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::internal(format!("Failed to encode row: {e}")))?;
    write_lines(lines)
}

fn write_lines(lines: impl IntoIterator<Item = String>) -> DbResult<()> {
    let mut stdout = std::io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{}", line)
            .map_err(|e| DbError::internal(format!("Failed to write output: {e}")))?;
    }
    Ok(())
}
