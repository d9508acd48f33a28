//! One-off eviction sweep.

use anyhow::{Context as _, Result};
use edge_proxy::Sweeper;

use super::SweepArgs;
use crate::context::Context;

/// Sweep the configured store once and print the report.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let edge = ctx.edge_context(store)?;

    let report = Sweeper::new(edge)
        .with_dry_run(args.dry_run)
        .sweep()
        .await
        .context("Failed to scan metadata store")?;

    if ctx.output.is_json() {
        ctx.output.json(&report);
        return Ok(());
    }

    ctx.output.header("Sweep report");
    ctx.output.kv("Scanned", &report.scanned.to_string());
    ctx.output.kv("Expired", &report.expired.to_string());
    ctx.output.kv("Orphaned", &report.orphaned.to_string());
    ctx.output.kv("Corrupt", &report.corrupt.to_string());
    ctx.output.kv("Stray bodies", &report.stray_bodies.to_string());
    ctx.output.kv("Stale partials", &report.stale_partials.to_string());
    ctx.output.kv("Busy", &report.busy.to_string());
    ctx.output.kv("Failed", &report.failed.to_string());
    ctx.output.kv("Kept", &report.kept.to_string());
    if args.dry_run {
        ctx.output
            .success(&format!("Would evict {} entries", report.evicted()));
    } else {
        ctx.output
            .success(&format!("Evicted {} entries", report.evicted()));
    }
    Ok(())
}
