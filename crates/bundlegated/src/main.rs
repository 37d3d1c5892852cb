//! bundlegated - bundle serving and build API
//!
//! Serves build output under `/builds/<id>/...` with per-build security
//! headers, exposes the build lifecycle under `/api/...`, and hosts the
//! ingestion worker pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bundlegate_core::telemetry::json_from_env;
use bundlegate_core::{
    data_root_from_env, init_tracing, CspConfig, HtmlTransformer, Promoter, PublishConfig,
    TransformOptions,
};
use bundlegate_ingest::{IngestConfig, IngestWorker, NodeProjectBuilder, WorkerPool};
use bundlegate_state::{FsBuildStore, FsListingStore};
use clap::Parser;
use tracing::{info, Level};

mod error;
mod routes;

use routes::{build_router, AppState, UPLOADS_DIR};

#[derive(Parser)]
#[command(name = "bundlegated")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "bundlegate daemon", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "BUNDLEGATE_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Data directory holding builds, listings and logs
    #[arg(long, env = "BUNDLEGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(json_from_env(), level);

    let data_root = cli.data_dir.unwrap_or_else(data_root_from_env);
    std::fs::create_dir_all(data_root.join(UPLOADS_DIR))
        .with_context(|| format!("Failed to create data directory {:?}", data_root))?;

    let builds = Arc::new(FsBuildStore::new(&data_root).context("Failed to open build store")?);
    let listings = Arc::new(FsListingStore::new(&data_root));
    let transformer = HtmlTransformer::new(TransformOptions::from_env());
    let promoter = Promoter::from_config(&data_root, PublishConfig::from_env(), transformer.clone())
        .context("Failed to configure promotion")?;

    let config = IngestConfig::from_env().with_data_root(&data_root);
    let builder = NodeProjectBuilder::new(config.build_timeout());
    let concurrency = config.concurrency;
    let worker = Arc::new(IngestWorker::new(
        config,
        builds.clone(),
        listings,
        transformer,
        Arc::new(builder),
    ));
    let pool = WorkerPool::start(worker.clone());

    let state = AppState {
        data_root: data_root.clone(),
        builds,
        csp: Arc::new(CspConfig::from_env()),
        promoter: Arc::new(promoter),
        worker,
        queue: pool.queue(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(
        event = "daemon.started",
        addr = %cli.bind,
        data_root = %data_root.display(),
        concurrency,
        "bundlegated listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router (and its queue handle) is gone; drain accepted jobs.
    let reports = pool.shutdown().await;
    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    info!(
        event = "daemon.stopped",
        jobs = reports.len(),
        failed,
        "bundlegated stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(event = "daemon.signal_failed", error = %e);
        std::future::pending::<()>().await;
    }
    info!(event = "daemon.shutdown", "shutdown requested");
}
