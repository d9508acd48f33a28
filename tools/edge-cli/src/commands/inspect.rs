//! List stored cache records.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use edge_cache::{CacheRecord, StoredEntry};
use edge_core::{Clock, SystemClock};
use serde::Serialize;

use super::InspectArgs;
use crate::context::Context;
use crate::output::{expiry_badge, format_bytes};

#[derive(Debug, Serialize)]
struct RecordRow {
    key: String,
    url: String,
    local_file: String,
    fetched_at: String,
    expires_at: String,
    #[serde(skip)]
    expires_at_unix: i64,
    expired: bool,
    must_revalidate: bool,
    etag: String,
    /// Body size on disk; `None` when the file is missing.
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CorruptRow {
    key: String,
    error: String,
}

#[derive(Debug, Default, Serialize)]
struct Listing {
    records: Vec<RecordRow>,
    corrupt: Vec<CorruptRow>,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let entries = store.scan().await.context("Failed to scan metadata store")?;
    let now = SystemClock.now();

    let mut listing = Listing::default();
    for StoredEntry { key, record } in entries {
        match record {
            Ok(record) => {
                let row = row(&record, key.to_string(), now, ctx);
                if !args.expired || row.expired {
                    listing.records.push(row);
                }
            }
            Err(e) => listing.corrupt.push(CorruptRow {
                key: key.to_string(),
                error: e.to_string(),
            }),
        }
    }
    listing.records.sort_by(|a, b| a.url.cmp(&b.url));

    if ctx.output.is_json() {
        ctx.output.json(&listing);
        return Ok(());
    }

    ctx.output
        .header(&format!("Cache records ({})", listing.records.len()));
    let widths = [32, 24, 10, 48];
    ctx.output.table_row(&["KEY", "STATE", "SIZE", "URL"], &widths);
    for row in &listing.records {
        let state = expiry_badge(row.expires_at_unix, now);
        let size = row.size.map(format_bytes).unwrap_or_else(|| "missing".into());
        ctx.output
            .table_row(&[&row.key, &state, &size, &row.url], &widths);
    }

    if !listing.corrupt.is_empty() {
        ctx.output
            .header(&format!("Unreadable records ({})", listing.corrupt.len()));
        for corrupt in &listing.corrupt {
            ctx.output.kv(&corrupt.key, &corrupt.error);
        }
    }
    Ok(())
}

fn row(record: &CacheRecord, key: String, now: i64, ctx: &Context) -> RecordRow {
    let size = record
        .body_path(&ctx.settings.cache_dir)
        .and_then(|path| std::fs::metadata(path).ok())
        .map(|meta| meta.len());

    RecordRow {
        key,
        url: record.url.clone(),
        local_file: record.local_file.display().to_string(),
        fetched_at: timestamp(record.fetched_at),
        expires_at: timestamp(record.expires_at()),
        expires_at_unix: record.expires_at(),
        expired: !record.is_fresh_at(now),
        must_revalidate: record.must_revalidate,
        etag: record.etag.clone(),
        size,
    }
}

fn timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(timestamp(1_700_000_000), "2023-11-14T22:13:20+00:00");
        assert_eq!(timestamp(i64::MAX), i64::MAX.to_string());
    }
}
