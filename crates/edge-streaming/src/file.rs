//! Cached body files.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

/// Suffix of bodies that are still being written.
pub const PARTIAL_SUFFIX: &str = "partial";

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// A cached body opened for streaming.
#[derive(Debug)]
pub struct FileBody {
    /// Size on disk.
    pub len: u64,
    /// Chunks of the file, read as the consumer pulls.
    pub stream: ReaderStream<File>,
}

impl FileBody {
    /// Open the body at `path`.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            len,
            stream: ReaderStream::new(file),
        })
    }
}

/// Unique sibling path used while `path` is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{name}.{}.{seq}.{PARTIAL_SUFFIX}",
        std::process::id()
    ))
}

/// Whether `path` is an in-progress write left by [`persist_atomically`].
pub fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

/// Write `body` to `path` so readers see either the old file or the new
/// one, never a prefix.
///
/// Parent directories are created as needed. The body goes to a unique
/// partial file in the same directory, is synced, then renamed over
/// `path`. On failure the partial file is removed.
pub async fn persist_atomically(path: &Path, body: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(path);
    let result = async {
        let mut file = File::create(&partial).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial file");
            }
        }
    }
    result
}

/// Remove a body file. A file that is already gone is not an error.
pub async fn remove_body(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_persist_creates_parents_and_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("css/deep/site.css");

        persist_atomically(&target, b"body{}").await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"body{}");

        let mut entries = tokio::fs::read_dir(target.parent().unwrap()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!is_partial(&entry.path()), "leftover {:?}", entry.path());
        }
    }

    #[tokio::test]
    async fn test_persist_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.png");
        persist_atomically(&target, b"old").await.unwrap();
        persist_atomically(&target, b"new").await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_persist_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way makes the rename fail.
        let target = dir.path().join("taken");
        tokio::fs::create_dir(&target).await.unwrap();
        tokio::fs::write(target.join("inner"), b"x").await.unwrap();

        assert!(persist_atomically(&target, b"body").await.is_err());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!is_partial(&entry.path()));
        }
    }

    #[test]
    fn test_partial_paths_are_unique_siblings() {
        let target = Path::new("/cache/img/logo.png");
        let a = partial_path(target);
        let b = partial_path(target);
        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());
        assert!(is_partial(&a));
        assert!(!is_partial(target));
    }

    #[tokio::test]
    async fn test_file_body_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.js");
        tokio::fs::write(&target, b"console.log(1)").await.unwrap();

        let body = FileBody::open(&target).await.unwrap();
        assert_eq!(body.len, 14);
        let chunks: Vec<_> = body.stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"console.log(1)");
    }

    #[tokio::test]
    async fn test_remove_body_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.js");
        tokio::fs::write(&target, b"x").await.unwrap();
        assert!(remove_body(&target).await.unwrap());
        assert!(!remove_body(&target).await.unwrap());
    }
}
