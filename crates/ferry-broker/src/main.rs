// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ferry broker daemon (ferryd).
//!
//! Hosts an in-memory transfer-queue ledger behind HTTP and answers long
//! pulls as messages arrive. A background sweeper expires stale pulls and
//! drops ones whose clients went away.

mod http;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ferry_app_core::config::ConfigService;
use ferry_app_core::prefs::{BrokerPrefs, BROKER_PREFS_KEY};
use ferry_config_fs::FsConfigStore;
use ferry_core::{ConsumerRegistry, MemoryLedger, Sweeper};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::http::{router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ferry long-polling broker")]
struct Args {
    /// HTTP listener (e.g. 127.0.0.1:9370); overrides the saved preference
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Milliseconds between reconciliation sweeps
    #[arg(long)]
    sweep_interval_ms: Option<u64>,
    /// Milliseconds a pull may stay parked before it times out
    #[arg(long)]
    pull_deadline_ms: Option<u64>,
    /// Let parked pulls wait forever
    #[arg(long, conflicts_with = "pull_deadline_ms")]
    no_pull_deadline: bool,
    /// Largest accepted message body in bytes
    #[arg(long)]
    max_payload_bytes: Option<usize>,
    /// Read preferences from this directory instead of the platform config dir
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

impl Args {
    /// Flags win over saved preferences.
    fn apply(&self, mut prefs: BrokerPrefs) -> BrokerPrefs {
        if let Some(listen) = self.listen {
            prefs.listen = listen.to_string();
        }
        if let Some(ms) = self.sweep_interval_ms {
            prefs.sweep_interval_ms = ms;
        }
        if self.no_pull_deadline {
            prefs.pull_deadline_ms = None;
        } else if let Some(ms) = self.pull_deadline_ms {
            prefs.pull_deadline_ms = Some(ms);
        }
        if let Some(bytes) = self.max_payload_bytes {
            prefs.max_payload_bytes = bytes;
        }
        prefs
    }
}

/// Best-effort prefs load: any config failure falls back to defaults.
fn load_prefs(config_dir: Option<&Path>) -> BrokerPrefs {
    let store = match config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    let store = match store {
        Ok(store) => store,
        Err(err) => {
            warn!(%err, "config store unavailable; using default prefs");
            return BrokerPrefs::default();
        }
    };
    match ConfigService::new(store).load_or_init::<BrokerPrefs>(BROKER_PREFS_KEY) {
        Ok((prefs, None)) => prefs,
        Ok((prefs, Some(err))) => {
            warn!(%err, "failed to persist default prefs");
            prefs
        }
        Err(err) => {
            warn!(%err, "failed to load prefs; using defaults");
            BrokerPrefs::default()
        }
    }
}

async fn shutdown_signal(registry: Arc<ConsumerRegistry>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    // parked pulls would hold their connections open past shutdown
    let cancelled = registry.shutdown();
    info!(cancelled, "shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let prefs = args.apply(load_prefs(args.config_dir.as_deref()));
    let listen: SocketAddr = prefs
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {:?}", prefs.listen))?;

    let ledger = Arc::new(MemoryLedger::new());
    let registry = Arc::new(
        ConsumerRegistry::new(ledger.clone()).with_pull_deadline(prefs.pull_deadline()),
    );

    let mut sweeper = Sweeper::new(prefs.sweep_interval());
    let sweep_registry = registry.clone();
    let sweep = tokio::spawn(async move { sweeper.run(sweep_registry).await });

    let state = Arc::new(AppState::new(
        registry.clone(),
        ledger,
        prefs.max_payload_bytes,
    ));
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    info!(
        addr = %listener.local_addr()?,
        deadline_ms = ?prefs.pull_deadline_ms,
        sweep_ms = prefs.sweep_interval_ms,
        "ferryd listening"
    );

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(registry))
        .await;
    sweep.abort();
    served.context("http server")?;
    Ok(())
}
