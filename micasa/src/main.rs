//! Process entry point: parses arguments, brings up the database, settings,
//! scheduler, script host and controller (in that order), waits for
//! SIGINT/SIGTERM, then tears everything down in reverse.
//!
//! The web server that would normally sit alongside the controller (serving
//! the `-p`/`-sslp` ports) is out of scope here; `port`/`sslport` are parsed
//! and logged so the flag surface matches, but nothing binds them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::filter::LevelFilter;

use micasa_runtime::{Controller, Scheduler};
use micasa_script::RhaiEngine;
use micasa_store::SqliteStore;

/// Micasa home-automation controller.
#[derive(Parser, Debug)]
#[command(name = "micasa", version, about = "Micasa home-automation controller")]
struct Cli {
    /// Port for web connections.
    #[arg(short = 'p', long, default_value_t = 80)]
    port: u16,

    /// Port for secure web connections (0 disables SSL).
    #[arg(short = 's', long = "sslport", visible_alias = "sslp", default_value_t = 0)]
    sslport: u16,

    /// Logging level: 0 = normal, 1 = verbose, 99 = debug.
    #[arg(short = 'l', long, default_value_t = 0)]
    loglevel: u8,

    /// Directory holding the SQLite database (created if missing). Defaults
    /// to an in-memory, non-durable store when omitted.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn resolve_log_level(loglevel: u8) -> LevelFilter {
    match loglevel {
        0 => LevelFilter::INFO,
        99 => LevelFilter::TRACE,
        _ => LevelFilter::DEBUG,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(resolve_log_level(cli.loglevel))
        .init();

    tracing::info!(port = cli.port, sslport = cli.sslport, "starting micasa");

    let store: Arc<dyn micasa_store::Store> = match &cli.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(SqliteStore::open(&dir.join("micasa.db")).await?)
        }
        None => {
            tracing::warn!("no --data-dir given, running with a non-durable in-memory store");
            Arc::new(SqliteStore::in_memory().await?)
        }
    };

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let scheduler = Arc::new(Scheduler::new_default());
    let script_host: Arc<dyn micasa_script::ScriptHost> = Arc::new(RhaiEngine::new());
    let controller = Controller::new(store, scheduler.clone(), script_host, tokio::runtime::Handle::current());

    controller.boot().await?;
    tracing::info!("controller ready");

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down");
    controller.shutdown().await;
    drop(controller);

    match Arc::try_unwrap(scheduler) {
        Ok(scheduler) => scheduler.shutdown(),
        Err(_) => tracing::warn!("scheduler still referenced at shutdown, skipping worker join"),
    }

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn loglevel_maps_to_the_documented_tiers() {
        assert_eq!(resolve_log_level(0), LevelFilter::INFO);
        assert_eq!(resolve_log_level(1), LevelFilter::DEBUG);
        assert_eq!(resolve_log_level(99), LevelFilter::TRACE);
    }

    #[test]
    fn cli_defaults_match_the_documented_usage() {
        let cli = Cli::parse_from(["micasa"]);
        assert_eq!(cli.port, 80);
        assert_eq!(cli.sslport, 0);
        assert_eq!(cli.loglevel, 0);
        assert!(cli.data_dir.is_none());
    }

    #[test]
    fn sslport_accepts_its_short_and_long_forms() {
        let short = Cli::parse_from(["micasa", "-s", "8443"]);
        assert_eq!(short.sslport, 8443);
        let long = Cli::parse_from(["micasa", "--sslport", "8443"]);
        assert_eq!(long.sslport, 8443);
    }
}
