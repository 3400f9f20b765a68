use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

/// A configuration document that compiles into an immutable snapshot.
pub trait RegistryDocument: Sized + Send + Sync {
    /// Short name used in log lines.
    const KIND: &'static str;

    fn load_from_path(path: &Path) -> anyhow::Result<Self>;

    /// Snapshot used when the document is missing or unreadable.
    fn empty() -> Self;
}

/// Holds the current snapshot of a registry and swaps it wholesale when the
/// backing file changes. Readers clone the `Arc` and keep a consistent view
/// for as long as they hold it.
pub struct HotReload<T> {
    path: Option<PathBuf>,
    current: RwLock<Arc<T>>,
    loaded_mtime: Mutex<Option<SystemTime>>,
}

impl<T: RegistryDocument> HotReload<T> {
    /// Loads the document at `path`. A missing or broken file yields the
    /// empty snapshot; the next `reload_if_needed` picks up a fixed file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mtime = modified_time(&path).ok();
        let snapshot = match T::load_from_path(&path) {
            Ok(snapshot) => {
                log::info!("Loaded {} registry from {}", T::KIND, path.display());
                snapshot
            }
            Err(e) => {
                log::warn!(
                    "Could not load {} registry, using empty registry: {e:#}",
                    T::KIND
                );
                T::empty()
            }
        };

        Self {
            path: Some(path),
            current: RwLock::new(Arc::new(snapshot)),
            loaded_mtime: Mutex::new(mtime),
        }
    }

    /// Fixed snapshot with no backing file; never reloads.
    pub fn from_snapshot(snapshot: T) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(snapshot)),
            loaded_mtime: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, snapshot: T) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Reloads when the file's modification time differs from the one last
    /// seen. Returns `Ok(true)` when a new snapshot was swapped in. On a load
    /// error the previous snapshot stays active.
    pub fn reload_if_needed(&self) -> anyhow::Result<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };

        let mtime = match modified_time(path) {
            Ok(mtime) => mtime,
            Err(e) => {
                log::debug!("{} registry file unavailable: {e:#}", T::KIND);
                return Ok(false);
            }
        };

        let mut loaded = self
            .loaded_mtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *loaded == Some(mtime) {
            return Ok(false);
        }
        // Remember the attempt so a broken file is not re-parsed on every call.
        *loaded = Some(mtime);

        let snapshot = T::load_from_path(path)?;
        self.replace(snapshot);
        log::info!("Reloaded {} registry from {}", T::KIND, path.display());
        Ok(true)
    }
}

fn modified_time(path: &Path) -> anyhow::Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("Failed to stat {}", path.display()))
}
