//! activetime ledger entrypoint.
//!
//! The authoritative store for session time accounting. Clients drive each
//! session through start/heartbeat/pause/resume/stop over newline-delimited
//! JSON on TCP; the ledger persists every transition in SQLite and computes
//! the final active duration.

use std::env;
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod ledger;
mod server;
mod session;

use db::Db;
use ledger::Ledger;

fn main() {
    init_logging();

    let config = match config::load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load ledger config");
            std::process::exit(1);
        }
    };

    let db_path = match config.resolved_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve ledger database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path.clone()) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, path = %db_path.display(), "Failed to initialize ledger database");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.bind_addr, "Failed to bind ledger address");
            std::process::exit(1);
        }
    };

    info!(
        addr = %config.bind_addr,
        db = %db_path.display(),
        "activetime ledger started"
    );

    server::serve(listener, Arc::new(Ledger::new(db)));
}

const DEBUG_ENV: &str = "ACTIVETIME_DEBUG_LOG";

/// Logs to stderr. `ACTIVETIME_DEBUG_LOG` forces debug; otherwise `RUST_LOG`
/// applies on top of an info default.
fn init_logging() {
    let filter = if debug_requested(env::var(DEBUG_ENV).ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn debug_requested(value: Option<&str>) -> bool {
    value.is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
