//! FIBRE exporter binary.
//!
//! Attaches to the USDT probes of a running bitcoind and exposes what they
//! report over two listeners:
//!
//! - `GET /metrics` (Prometheus text, optional Basic auth)
//! - `GET /health`, `GET /ready`
//!
//! Probe records are read on a blocking thread and fed through the
//! `relay` pipeline into a shared metrics store.

mod config;
mod logging;
mod process;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use config::{Cli, ExporterConfig};
use relay::{
    LoaderProvider, MetricsAuth, MetricsStore, Pipeline, ProbeLifecycle, run_ingestion,
    serve_metrics,
};
use state::HealthState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let config = match ExporterConfig::resolve(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let log_guard = match logging::init(config.log_level, config.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = run(config).await;
    if let Err(e) = &result {
        error!("fatal error: {e:#}");
    }
    // Flush the file writer before exiting.
    drop(log_guard);
    if result.is_err() {
        std::process::exit(1);
    }
}

async fn run(config: ExporterConfig) -> anyhow::Result<()> {
    info!(
        version = VERSION,
        node = %config.node_name,
        bitcoind = %config.bitcoind_path.display(),
        "starting fibre exporter"
    );

    // ---------------------------
    // Target process
    // ---------------------------

    let pid = match config.pid {
        Some(pid) => pid,
        None => {
            let pid = process::find_pid(&config.bitcoind_path)
                .context("could not auto-detect the bitcoind PID; pass --pid")?;
            info!(pid, "auto-detected bitcoind");
            pid
        }
    };

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(MetricsStore::new().context("failed to initialise metrics")?);
    metrics.set_info(
        VERSION,
        &config.node_name,
        &config.bitcoind_path.display().to_string(),
    )?;

    // ---------------------------
    // Probes
    // ---------------------------

    let provider = LoaderProvider::spawn(&config.probe_loader, pid, &config.bitcoind_path)
        .with_context(|| {
            format!(
                "failed to start probe loader {}",
                config.probe_loader.display()
            )
        })?;
    let mut lifecycle = ProbeLifecycle::new(provider, metrics.clone());
    lifecycle.verify_target(&config.bitcoind_path);
    let attached = lifecycle
        .attach_all()
        .context("failed to attach probes")?;
    info!(attached, total = relay::PROBES.len(), "probes attached");

    // ---------------------------
    // HTTP listeners
    // ---------------------------

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    let auth = MetricsAuth::new(
        config.metrics_auth_username.clone(),
        config.metrics_auth_password.clone(),
    );
    if !auth.is_enabled() && config.has_partial_metrics_auth() {
        warn!("only one of the metrics auth credentials is set; /metrics is unauthenticated");
    }
    info!(addr = %metrics_addr, auth = auth.is_enabled(), "metrics endpoint listening");
    let metrics_server = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(metrics_listener, metrics_server, auth).await {
            error!("metrics HTTP server error: {e}");
        }
    });

    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let health_listener = TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("failed to bind health listener on {health_addr}"))?;
    let health = HealthState::new();
    let app = routes::router(health.clone());
    info!(addr = %health_addr, "health endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, app).await {
            error!("health HTTP server error: {e}");
        }
    });

    metrics.mark_up(SystemTime::now())?;

    // ---------------------------
    // Ingestion
    // ---------------------------

    let stop = Arc::new(AtomicBool::new(false));
    let relay_config = config.relay_config();
    let mut pipeline = Pipeline::new(&relay_config, metrics.clone());
    let ingest_stop = stop.clone();
    let mut ingest = tokio::task::spawn_blocking(move || {
        let result = run_ingestion(
            &mut lifecycle,
            &mut pipeline,
            relay_config.poll_timeout,
            &ingest_stop,
        );
        lifecycle.shutdown();
        result
    });

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            health.set_alive(false);
            stop.store(true, Ordering::Release);
            (&mut ingest).await
        }
        finished = &mut ingest => finished,
    };

    health.set_alive(false);
    metrics.mark_down()?;
    outcome
        .context("ingestion thread panicked")?
        .context("ingestion loop failed")?;

    info!("shutdown complete");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
