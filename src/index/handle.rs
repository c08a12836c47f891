use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};

use super::snapshot::IndexSnapshot;
use super::store::IndexStore;
use crate::core::errors::IndexError;

/// Shared, swappable reference to the current index snapshot.
///
/// Readers clone the inner `Arc` and keep using it for the whole request, so a
/// reload never changes the data under an in-flight search.
#[derive(Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Option<Arc<IndexSnapshot>>>>,
    store: Option<Arc<dyn IndexStore>>,
}

impl IndexHandle {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(Arc::new(snapshot)))),
            store: None,
        }
    }

    /// A handle with nothing loaded yet. Queries fail until a snapshot arrives.
    pub fn unloaded() -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn current(&self) -> Result<Arc<IndexSnapshot>, IndexError> {
        let guard = self
            .current
            .read()
            .map_err(|_| IndexError::Storage("index handle lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| IndexError::Missing("no index has been loaded".to_string()))
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Installs `snapshot` and returns the one it replaced.
    pub fn swap(&self, snapshot: IndexSnapshot) -> Option<Arc<IndexSnapshot>> {
        let next = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => guard.replace(next),
            Err(poisoned) => poisoned.into_inner().replace(next),
        }
    }

    /// Loads a fresh snapshot from the backing store and swaps it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<Arc<IndexSnapshot>, IndexError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| IndexError::Missing("index has no backing store".to_string()))?;

        let snapshot = store.load_snapshot().await?;
        tracing::info!(
            "Loaded index from {} ({} items, fingerprint {})",
            store.describe(),
            snapshot.items().len(),
            snapshot.fingerprint()
        );
        self.swap(snapshot);
        self.current()
    }

    /// Reloads whenever the database file (or its WAL) changes on disk.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn watch(&self, db_path: &Path) -> notify::Result<notify::RecommendedWatcher> {
        let watch_dir = db_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            let touches_index = event.paths.iter().any(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&file_name))
                    .unwrap_or(false)
            });
            if touches_index {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        let handle = self.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Let the writer finish its transaction, then coalesce the burst.
                tokio::time::sleep(Duration::from_millis(500)).await;
                while rx.try_recv().is_ok() {}

                if let Err(err) = handle.reload().await {
                    tracing::warn!("Index reload after file change failed: {}", err);
                }
            }
        });

        Ok(watcher)
    }
}
