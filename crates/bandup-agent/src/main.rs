//! # bandup agent
//!
//! Daemon that runs the multi-band duplication controller on a device.
//! Host events arrive as JSON lines on stdin; throughput comes from sysfs
//! interface counters and slave signal levels from `/proc/net/wireless`.
//! Device actions go to a hook executable, or are only logged when no hook
//! is given.
//!
//! ## Usage
//!
//! ```bash
//! # Log-only backend, events typed or piped in
//! bandup-agent --config /etc/bandup.toml
//!
//! # Real device actions through a hook script, with Prometheus metrics
//! hostapd-events | bandup-agent --config /etc/bandup.toml \
//!   --hook /usr/libexec/bandup-hook --metrics-addr 0.0.0.0:9105
//! ```

mod feed;
mod hook;
mod poller;
mod signal;
mod sim;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use bandup_core::collab::{
    DeviceSensitivity, DuplicationChannel, InterfaceBinder, MultiBandSource, PeerControl,
    SessionTransfer,
};
use bandup_core::mbie::Ieee80211Parser;
use bandup_core::membership::FileMembershipWriter;
use bandup_core::metrics::MetricsServer;
use bandup_core::{BandupConfig, Collaborators, RateUpgradeManager, RuntimeBuilder};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::hook::HookBackend;
use crate::poller::SysfsTrafficPoller;
use crate::signal::ProcSignalMonitor;
use crate::sim::SimBackend;

/// Multi-band session duplication daemon.
#[derive(Parser, Debug)]
#[command(name = "bandup-agent", about = "Multi-band session duplication daemon")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Executable that performs device actions. Without it every device
    /// action is only logged.
    #[arg(long)]
    hook: Option<PathBuf>,

    /// Serve Prometheus metrics (`/metrics`) and JSON status (`/status`).
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Depth of the event dispatch queue.
    #[arg(long, default_value_t = bandup_core::runtime::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .compact()
        .init();

    let config = BandupConfig::load(&cli.config)?;
    tracing::info!(
        config = %cli.config.display(),
        groups = config.groups.len(),
        hook = ?cli.hook,
        metrics = ?cli.metrics_addr,
        "bandup-agent starting"
    );

    // ── Collaborators ───────────────────────────────────────────
    let builder = RuntimeBuilder::new(cli.queue_capacity);
    let poller = Arc::new(SysfsTrafficPoller::new(builder.sender()));
    let monitor = Arc::new(
        ProcSignalMonitor::start(builder.sender()).context("starting signal monitor")?,
    );
    let collab = match &cli.hook {
        Some(path) => collaborators(Arc::new(HookBackend::new(path)), &poller, &monitor),
        None => collaborators(Arc::new(SimBackend::new()), &poller, &monitor),
    };

    // ── Dispatch runtime ────────────────────────────────────────
    let manager = RateUpgradeManager::from_config(config, collab)?;
    let mut runtime = builder.spawn(manager).context("spawning dispatch worker")?;

    let mut metrics = match cli.metrics_addr {
        Some(addr) => Some(
            MetricsServer::start(addr, runtime.status_handle())
                .with_context(|| format!("binding metrics server on {addr}"))?,
        ),
        None => None,
    };

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    // ── Event feed ──────────────────────────────────────────────
    let feed_done = Arc::new(AtomicBool::new(false));
    {
        let sender = runtime.sender();
        let feed_done = feed_done.clone();
        std::thread::Builder::new()
            .name("bandup-feed".into())
            .spawn(move || {
                match feed::run(std::io::stdin().lock(), &sender) {
                    Ok(n) => tracing::info!(events = n, "event feed closed"),
                    Err(e) => tracing::error!(error = %e, "event feed failed"),
                }
                feed_done.store(true, Ordering::Relaxed);
            })?;
    }

    while running.load(Ordering::Relaxed) && !feed_done.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    // ── Cleanup ─────────────────────────────────────────────────
    let td = runtime.shutdown();
    for failure in &td.failures {
        tracing::warn!(
            step = %failure.step,
            iface = %failure.iface,
            error = %failure.error,
            "teardown step failed"
        );
    }
    poller.shutdown();
    tracing::debug!(armed = ?monitor.armed(), "stopping signal monitor");
    monitor.shutdown();
    if let Some(server) = metrics.as_mut() {
        server.stop();
    }
    tracing::info!(failures = td.failures.len(), "bandup-agent stopped");
    Ok(())
}

fn collaborators<B>(
    backend: Arc<B>,
    poller: &Arc<SysfsTrafficPoller>,
    monitor: &Arc<ProcSignalMonitor>,
) -> Collaborators
where
    B: InterfaceBinder
        + DuplicationChannel
        + DeviceSensitivity
        + MultiBandSource
        + SessionTransfer
        + PeerControl
        + 'static,
{
    Collaborators {
        binder: backend.clone(),
        membership: Arc::new(FileMembershipWriter),
        duplication: backend.clone(),
        sensitivity: backend.clone(),
        poller: poller.clone(),
        signal: monitor.clone(),
        multiband: backend.clone(),
        parser: Arc::new(Ieee80211Parser),
        transfer: backend.clone(),
        peers: backend,
    }
}
