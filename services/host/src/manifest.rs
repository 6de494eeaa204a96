//! The on-disk app manifest (spec.md §2: "core only consumes loader/saver
//! callbacks; the manifest format and directory watcher are out of
//! scope"). This module supplies that I/O layer: a JSON-file-backed
//! `ManifestStore` plus a `notify`-based watcher that reloads the registry
//! when the file changes on disk -- guarded by a pause flag so the
//! watcher doesn't react to the process's own writes.

use apphost_protocol::AppInfo;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write manifest at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait ManifestStore: Send + Sync {
    fn load(&self) -> Result<Vec<AppInfo>, ManifestError>;
    fn save(&self, apps: &[AppInfo]) -> Result<(), ManifestError>;
}

/// A manifest backed by a single JSON file containing an array of
/// `AppInfo` records.
pub struct JsonFileManifest {
    path: PathBuf,
    /// Set for the duration of `save()` so a paired watcher ignores the
    /// filesystem event its own write produces.
    suppress_next_event: Arc<AtomicBool>,
}

impl JsonFileManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            suppress_next_event: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.suppress_next_event.clone()
    }
}

impl ManifestStore for JsonFileManifest {
    fn load(&self) -> Result<Vec<AppInfo>, ManifestError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| ManifestError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, apps: &[AppInfo]) -> Result<(), ManifestError> {
        self.suppress_next_event.store(true, Ordering::SeqCst);
        let text = serde_json::to_string_pretty(apps).expect("AppInfo always serializes");
        std::fs::write(&self.path, text).map_err(|source| ManifestError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Watches `path` for changes and invokes `on_change` whenever the file is
/// modified by something other than `store.save()`. Returns the watcher;
/// drop it to stop watching.
pub fn watch_manifest(
    path: &Path,
    pause_flag: Arc<AtomicBool>,
    on_change: impl Fn() + Send + 'static,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
            if pause_flag.swap(false, Ordering::SeqCst) {
                debug!("ignoring manifest fs event caused by our own save()");
                return;
            }
            on_change();
        }
        Ok(_) => {}
        Err(err) => warn!(%err, "manifest watcher error"),
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_a_missing_manifest_yields_an_empty_list() {
        let manifest = JsonFileManifest::new("/nonexistent/path/manifest.json");
        let apps = manifest.load().unwrap();
        assert!(apps.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("apphost-manifest-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.json");
        let manifest = JsonFileManifest::new(&path);
        let apps = vec![AppInfo::new("demo", 1)];
        manifest.save(&apps).unwrap();
        let loaded = manifest.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "demo");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn save_sets_the_pause_flag() {
        let dir = std::env::temp_dir().join(format!("apphost-manifest-flag-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.json");
        let manifest = JsonFileManifest::new(&path);
        let flag = manifest.pause_flag();
        assert!(!flag.load(Ordering::SeqCst));
        manifest.save(&[]).unwrap();
        assert!(flag.load(Ordering::SeqCst));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
