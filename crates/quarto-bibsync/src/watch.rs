//! Filesystem watching for a synchronized pair
//!
//! Both files are watched through their parent directories, so saves done by
//! replacing the file (most editors, and our own atomic writes) are seen the
//! same way as in-place writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fs_util::{canonical_target, parent_dir};
use crate::ownership::Side;

/// Default debounce duration for filesystem events (in milliseconds).
/// This batches rapid file saves into a single event.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Events emitted by the filesystem watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// One of the pair's files was created, written or replaced
    Modified(Side),
}

/// Configuration for the filesystem watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Debounce duration in milliseconds
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Filesystem watcher for one bib/doc pair.
pub struct FileWatcher {
    /// The debouncer wrapping the underlying watcher
    _debouncer: Debouncer<notify::RecommendedWatcher>,

    /// Receiver for watch events
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl FileWatcher {
    /// Start watching `bib` and `doc`.
    ///
    /// Paths should be absolute; events are matched against them after
    /// canonicalizing the parent directory.
    pub fn new(bib: &Path, doc: &Path, config: WatchConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut targets = HashMap::new();
        targets.insert(canonical_target(bib), Side::Bib);
        targets.insert(canonical_target(doc), Side::Doc);

        let mut debouncer = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            move |res: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match res {
                Ok(events) => {
                    for event in events {
                        let Some(side) = targets.get(&canonical_target(&event.path)).copied()
                        else {
                            continue;
                        };
                        debug!(path = %event.path.display(), side = %side, "File change detected");
                        if event_tx.send(WatchEvent::Modified(side)).is_err() {
                            debug!("Event receiver dropped, stopping watcher");
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Filesystem watch error");
                }
            },
        )
        .map_err(|e| Error::Watch(format!("failed to create filesystem watcher: {}", e)))?;

        let mut dirs: Vec<PathBuf> = [bib, doc].iter().map(|p| parent_dir(p)).collect();
        dirs.dedup();
        for dir in &dirs {
            debouncer
                .watcher()
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    Error::Watch(format!("failed to watch {}: {}", dir.display(), e))
                })?;
        }

        info!(
            bib = %bib.display(),
            doc = %doc.display(),
            debounce_ms = config.debounce_ms,
            "Started filesystem watcher"
        );

        Ok(Self {
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Receive the next watch event.
    ///
    /// Returns `None` if the watcher has been stopped.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_creation() {
        let temp = TempDir::new().unwrap();
        let watcher = FileWatcher::new(
            &temp.path().join("refs.bib"),
            &temp.path().join("notes.qmd"),
            WatchConfig::default(),
        );
        assert!(watcher.is_ok());
    }

    #[tokio::test]
    async fn test_watcher_reports_side() {
        let temp = TempDir::new().unwrap();
        // Canonicalize to handle macOS /var -> /private/var symlinks
        let temp_path = temp.path().canonicalize().unwrap();
        let bib = temp_path.join("refs.bib");
        let doc = temp_path.join("notes.qmd");
        std::fs::write(&bib, "").unwrap();
        std::fs::write(&doc, "").unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut watcher = FileWatcher::new(&bib, &doc, WatchConfig { debounce_ms: 100 }).unwrap();

        std::fs::write(temp_path.join("unrelated.txt"), "ignored").unwrap();
        std::fs::write(&doc, "changed").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), watcher.recv()).await;
        match event {
            Ok(Some(WatchEvent::Modified(side))) => assert_eq!(side, Side::Doc),
            Ok(None) => panic!("Watcher stopped unexpectedly"),
            Err(_) => panic!("Timeout waiting for file change event"),
        }
    }
}
