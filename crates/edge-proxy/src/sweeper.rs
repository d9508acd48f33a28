//! Periodic eviction of expired cache entries.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use edge_cache::{request_path_for, CacheError, CacheKey, CacheRecord, MetadataStore, StoredEntry};
use edge_executor::PeriodicTask;
use edge_streaming::{is_partial, remove_body};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::EdgeContext;

/// Files in the cache tree younger than this may belong to a write that
/// has not registered its record yet.
pub const DEFAULT_FILE_GRACE: Duration = Duration::from_secs(600);

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries examined.
    pub scanned: usize,
    /// Past `fetched_at + max_age`; record and body removed.
    pub expired: usize,
    /// Record whose body is gone; record removed.
    pub orphaned: usize,
    /// Undecodable record; record removed.
    pub corrupt: usize,
    /// Body file with no record; file removed.
    pub stray_bodies: usize,
    /// Leftover `*.partial` write; file removed.
    pub stale_partials: usize,
    /// Skipped because a fetch held the key.
    pub busy: usize,
    /// Deletions that failed.
    pub failed: usize,
    /// Fresh entries left alone.
    pub kept: usize,
}

impl SweepReport {
    /// Records and stray files removed in this sweep.
    pub fn evicted(&self) -> usize {
        self.expired + self.orphaned + self.corrupt + self.stray_bodies + self.stale_partials
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Expired,
    Orphaned,
}

/// Removes expired entries, keeping records and bodies paired.
#[derive(Clone)]
pub struct Sweeper {
    ctx: EdgeContext,
    dry_run: bool,
    file_grace: Duration,
}

impl Sweeper {
    pub fn new(ctx: EdgeContext) -> Self {
        Self {
            ctx,
            dry_run: false,
            file_grace: DEFAULT_FILE_GRACE,
        }
    }

    /// Leave files in the cache tree alone until they are this old.
    pub fn with_file_grace(mut self, grace: Duration) -> Self {
        self.file_grace = grace;
        self
    }

    /// Count what would be evicted without deleting anything.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Scan the store once and delete every entry with
    /// `now > fetched_at + max_age`, plus orphaned and corrupt records.
    /// Then walk the cache tree and remove bodies that have no record and
    /// leftover partial writes.
    ///
    /// Keys held by an in-flight fetch are skipped. Only a failed scan is
    /// an error; individual delete failures are counted.
    pub async fn sweep(&self) -> Result<SweepReport, CacheError> {
        let entries = self.ctx.store().scan().await?;
        let now = self.ctx.now();
        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };

        for StoredEntry { key, record } in entries {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "removing undecodable cache record");
                    self.delete_corrupt(&key, &mut report).await;
                    continue;
                }
            };

            let Some(body_path) = record.body_path(self.ctx.cache_root()) else {
                warn!(key = %key, local_file = %record.local_file.display(), "removing record with unsafe body path");
                self.delete_corrupt(&key, &mut report).await;
                continue;
            };

            if self.verdict(&record, &body_path, now).await == Verdict::Keep {
                report.kept += 1;
                continue;
            }

            let Some(_guard) = self.ctx.locks().try_acquire(key.as_str()) else {
                debug!(key = %key, "key busy, skipping");
                report.busy += 1;
                continue;
            };

            // Re-read under the lock; a fetch may have replaced the entry.
            let current = match self.ctx.store().get(&key).await {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(_) => record,
            };
            let verdict = self.verdict(&current, &body_path, now).await;
            match verdict {
                Verdict::Keep => report.kept += 1,
                Verdict::Expired => {
                    if self.delete_entry(&key, &body_path, &mut report).await {
                        debug!(url = %current.url, expired_at = current.expires_at(), "evicted expired entry");
                        report.expired += 1;
                    }
                }
                Verdict::Orphaned => {
                    if self.delete_entry(&key, &body_path, &mut report).await {
                        debug!(url = %current.url, "evicted orphaned record");
                        report.orphaned += 1;
                    }
                }
            }
        }

        self.reclaim_files(&mut report).await;

        if !self.dry_run {
            self.ctx.metrics().record_evicted(report.evicted() as u64);
        }
        info!(
            dry_run = self.dry_run,
            scanned = report.scanned,
            expired = report.expired,
            orphaned = report.orphaned,
            corrupt = report.corrupt,
            stray_bodies = report.stray_bodies,
            stale_partials = report.stale_partials,
            busy = report.busy,
            failed = report.failed,
            kept = report.kept,
            "sweep complete"
        );
        Ok(report)
    }

    /// Remove files under the cache root that no record accounts for.
    ///
    /// A body maps back to exactly one key through its path, so a body is
    /// stray when that key has no record. Files inside the grace period and
    /// keys held by a fetch are left for a later sweep.
    async fn reclaim_files(&self, report: &mut SweepReport) {
        let root = self.ctx.cache_root().to_path_buf();
        let files = match tokio::task::spawn_blocking({
            let root = root.clone();
            move || collect_files(&root)
        })
        .await
        {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cache tree scan failed");
                return;
            }
        };

        let mut removed_any = false;
        for (path, modified) in files {
            let age = modified.elapsed().unwrap_or_default();
            if age < self.file_grace {
                continue;
            }

            if is_partial(&path) {
                if self.remove_stray(&path, report).await {
                    debug!(path = %path.display(), "removed leftover partial write");
                    report.stale_partials += 1;
                    removed_any = true;
                }
                continue;
            }

            let Some(location) = path
                .strip_prefix(&root)
                .ok()
                .and_then(request_path_for)
                .and_then(|request_path| self.ctx.locate(&request_path).ok())
            else {
                continue;
            };

            let Some(_guard) = self.ctx.locks().try_acquire(location.key.as_str()) else {
                report.busy += 1;
                continue;
            };
            match self.ctx.store().get(&location.key).await {
                Ok(None) => {
                    if self.remove_stray(&path, report).await {
                        debug!(url = %location.url, "removed body with no record");
                        report.stray_bodies += 1;
                        removed_any = true;
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => debug!(key = %location.key, error = %e, "record unreadable, keeping body"),
            }
        }

        if removed_any && !self.dry_run {
            if let Err(e) = tokio::task::spawn_blocking(move || prune_empty_dirs(&root)).await {
                warn!(error = %e, "failed to prune empty cache directories");
            }
        }
    }

    async fn remove_stray(&self, path: &Path, report: &mut SweepReport) -> bool {
        if self.dry_run {
            return true;
        }
        match remove_body(path).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove stray cache file");
                report.failed += 1;
                false
            }
        }
    }

    async fn verdict(&self, record: &CacheRecord, body_path: &Path, now: i64) -> Verdict {
        if !record.is_fresh_at(now) {
            return Verdict::Expired;
        }
        match tokio::fs::try_exists(body_path).await {
            Ok(false) => Verdict::Orphaned,
            _ => Verdict::Keep,
        }
    }

    /// Record first, then body. `false` if either step failed.
    async fn delete_entry(
        &self,
        key: &CacheKey,
        body_path: &Path,
        report: &mut SweepReport,
    ) -> bool {
        if self.dry_run {
            return true;
        }
        if let Err(e) = self.ctx.store().delete(key).await {
            warn!(key = %key, error = %e, "failed to delete expired record");
            report.failed += 1;
            return false;
        }
        if let Err(e) = remove_body(body_path).await {
            warn!(path = %body_path.display(), error = %e, "failed to remove expired body");
            report.failed += 1;
            return false;
        }
        true
    }

    async fn delete_corrupt(&self, key: &CacheKey, report: &mut SweepReport) {
        if self.dry_run {
            report.corrupt += 1;
            return;
        }
        match self.ctx.store().delete(key).await {
            Ok(()) => report.corrupt += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to delete cache record");
                report.failed += 1;
            }
        }
    }

    /// Sweep every `interval` until `shutdown` is cancelled, logging the
    /// cache counters after each run.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        PeriodicTask::new("cache-sweeper", interval).spawn(shutdown, move || {
            let sweeper = self.clone();
            async move {
                if let Err(e) = sweeper.sweep().await {
                    warn!(error = %e, "cache sweep failed");
                }
                sweeper.ctx.metrics().log_summary();
            }
        })
    }
}

/// Every regular file under `dir` with its modification time.
fn collect_files(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut files = Vec::new();
    collect_files_recursive(dir, &mut files);
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<(PathBuf, SystemTime)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "failed to read cache directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            collect_files_recursive(&path, files);
        } else if file_type.is_file() {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, modified));
        }
    }
}

/// Remove directories left empty below `dir`, keeping `dir` itself.
fn prune_empty_dirs(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            let path = entry.path();
            prune_empty_dirs(&path);
            // Fails while the directory still has entries.
            let _ = std::fs::remove_dir(&path);
        }
    }
}
