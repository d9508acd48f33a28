//! CLI execution context.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use edge_cache::{MemoryStore, MetadataStore, RocksDbStore};
use edge_data::ReqwestOrigin;
use edge_proxy::EdgeContext;

use crate::config::Settings;
use crate::output::Output;

/// Execution context for CLI commands.
pub struct Context {
    /// Resolved settings.
    pub settings: Settings,
    /// Output handler.
    pub output: Output,
}

impl Context {
    pub fn new(settings: Settings, output: Output) -> Self {
        Self { settings, output }
    }

    /// Open the metadata store: RocksDB, or memory for `--ephemeral`.
    pub fn open_store(&self) -> Result<Arc<dyn MetadataStore>> {
        if self.settings.ephemeral {
            tracing::warn!("using in-memory metadata; the cache is lost on exit");
            return Ok(Arc::new(MemoryStore::new()));
        }

        if let Some(parent) = self.settings.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }
        let store = RocksDbStore::open(&self.settings.db_path).with_context(|| {
            format!(
                "Failed to open metadata store: {}",
                self.settings.db_path.display()
            )
        })?;
        Ok(Arc::new(store))
    }

    /// Shared handles for serving and sweeping.
    pub fn edge_context(&self, store: Arc<dyn MetadataStore>) -> Result<EdgeContext> {
        let origin = self.settings.origin()?.clone();
        std::fs::create_dir_all(&self.settings.cache_dir).with_context(|| {
            format!(
                "Failed to create cache directory: {}",
                self.settings.cache_dir.display()
            )
        })?;

        let client =
            ReqwestOrigin::new(self.settings.timeouts).context("Failed to build origin client")?;

        Ok(EdgeContext::new(
            origin,
            self.settings.cache_dir.clone(),
            store,
            Arc::new(client),
        )
        .with_settings(self.settings.cache))
    }
}
