//! Run the proxy.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use edge_proxy::{Dispatcher, Sweeper};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::Context;
use crate::output::format_bytes;

/// Serve until Ctrl-C, sweeping on the configured interval.
pub async fn run(ctx: &Context) -> Result<()> {
    let settings = &ctx.settings;
    let store = ctx.open_store()?;
    let edge = ctx.edge_context(store)?;

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen))?;

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(edge.clone()).spawn(settings.sweep_interval, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    info!(
        cache_dir = %settings.cache_dir.display(),
        db_path = %settings.db_path.display(),
        sweep_interval_secs = settings.sweep_interval.as_secs(),
        coalesce_misses = settings.cache.coalesce_misses,
        "cache configured"
    );

    let dispatcher = Arc::new(Dispatcher::new(edge.clone()));
    let served = edge_proxy::serve(listener, dispatcher, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = sweeper.await {
        warn!(error = %e, "sweeper task ended abnormally");
    }

    let metrics = edge.metrics().snapshot();
    edge.metrics().log_summary();
    info!(
        served_from_cache = %format_bytes(metrics.bytes_served_from_cache),
        hit_ratio = metrics.hit_ratio(),
        "edge proxy stopped"
    );

    served.context("HTTP server failed")
}
