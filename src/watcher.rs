//! File system watcher for module libraries and manifests.
//!
//! The watcher only reports changes. Deciding whether a change warrants a
//! hot swap, and building the replacement unit, is left to the host.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;

use crate::error::{Error, Result};

const LIBRARY_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];
const MANIFEST_EXTENSIONS: &[&str] = &["toml", "json"];

/// Configuration for the module watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Minimum time between two reported events for one path.
    pub debounce: Duration,
    /// Whether to watch directories recursively.
    pub recursive: bool,
    /// File extensions to report.
    pub extensions: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            recursive: true,
            extensions: LIBRARY_EXTENSIONS
                .iter()
                .chain(MANIFEST_EXTENSIONS)
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl WatchConfig {
    /// Create a new watch configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce duration.
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Set recursive watching.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Replace the reported extensions.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

/// What kind of file an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// A module library.
    Library,
    /// A descriptor manifest.
    Manifest,
    /// Anything else that passed the extension filter.
    Other,
}

/// Event emitted when a watched file changes.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A file was created.
    Created {
        /// Path to the created file.
        path: PathBuf,
    },
    /// A file was modified.
    Modified {
        /// Path to the modified file.
        path: PathBuf,
    },
    /// A file was removed.
    Removed {
        /// Path to the removed file.
        path: PathBuf,
    },
}

impl WatchEvent {
    /// Get the path for this event.
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path } | Self::Modified { path } | Self::Removed { path } => path,
        }
    }

    /// Check if this event affects a file with one of the given extensions.
    pub fn matches_extension(&self, extensions: &[String]) -> bool {
        match self.extension() {
            Some(ext) => extensions.iter().any(|e| e == ext),
            None => false,
        }
    }

    /// Classify the file by extension.
    pub fn target(&self) -> WatchTarget {
        match self.extension() {
            Some(ext) if LIBRARY_EXTENSIONS.contains(&ext) => WatchTarget::Library,
            Some(ext) if MANIFEST_EXTENSIONS.contains(&ext) => WatchTarget::Manifest,
            _ => WatchTarget::Other,
        }
    }

    /// Module name derived from a library file name.
    ///
    /// Strips the platform library prefix, so `liblighting.so` yields
    /// `lighting` on Linux.
    pub fn module_name(&self) -> Option<&str> {
        if self.target() != WatchTarget::Library {
            return None;
        }

        let stem = self.path().file_stem()?.to_str()?;
        Some(
            stem.strip_prefix(std::env::consts::DLL_PREFIX)
                .filter(|s| !s.is_empty())
                .unwrap_or(stem),
        )
    }

    fn extension(&self) -> Option<&str> {
        self.path().extension().and_then(|e| e.to_str())
    }

    fn from_notify(event: &Event) -> Option<Self> {
        let path = event.paths.first()?.clone();
        match event.kind {
            EventKind::Create(_) => Some(Self::Created { path }),
            EventKind::Modify(_) => Some(Self::Modified { path }),
            EventKind::Remove(_) => Some(Self::Removed { path }),
            _ => None,
        }
    }
}

type EventHandler = Box<dyn Fn(WatchEvent) + Send + Sync>;

struct WatchState {
    last_events: HashMap<PathBuf, Instant>,
    handlers: Vec<EventHandler>,
}

impl WatchState {
    /// Apply the filter and debounce, then notify handlers.
    fn dispatch(&mut self, config: &WatchConfig, event: WatchEvent, now: Instant) -> bool {
        if !event.matches_extension(&config.extensions) {
            return false;
        }

        let path = event.path().to_path_buf();
        if let Some(last) = self.last_events.get(&path) {
            if now.duration_since(*last) < config.debounce {
                return false;
            }
        }
        self.last_events.insert(path, now);

        tracing::debug!("Module file changed: {:?}", event);
        for handler in &self.handlers {
            handler(event.clone());
        }
        true
    }
}

/// Watches module directories and reports changed libraries and manifests.
pub struct ModuleWatcher {
    config: WatchConfig,
    watcher: Option<RecommendedWatcher>,
    watched_paths: RwLock<Vec<PathBuf>>,
    state: Arc<RwLock<WatchState>>,
    running: Arc<AtomicBool>,
}

impl ModuleWatcher {
    /// Create a new module watcher. Nothing is watched until [`start`](Self::start).
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            watcher: None,
            watched_paths: RwLock::new(Vec::new()),
            state: Arc::new(RwLock::new(WatchState {
                last_events: HashMap::new(),
                handlers: Vec::new(),
            })),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(WatchConfig::default())
    }

    /// Get the watcher configuration.
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Check if the watcher is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Add an event handler.
    pub fn on_change<F>(&self, handler: F)
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        self.state.write().handlers.push(Box::new(handler));
    }

    /// Start watching every registered path.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let state = self.state.clone();
        let config = self.config.clone();
        let running = self.running.clone();

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }

                match res {
                    Ok(event) => {
                        if let Some(event) = WatchEvent::from_notify(&event) {
                            state.write().dispatch(&config, event, Instant::now());
                        }
                    }
                    Err(e) => tracing::warn!("Module watcher error: {}", e),
                }
            },
            Config::default(),
        )
        .map_err(|e| Error::Watch(e.to_string()))?;

        self.watcher = Some(watcher);

        let paths = self.watched_paths.read().clone();
        for path in &paths {
            if let Err(e) = self.watch_path_internal(path) {
                self.watcher = None;
                return Err(e);
            }
        }

        self.running.store(true, Ordering::Relaxed);

        tracing::info!("Module watcher started on {} paths", paths.len());
        Ok(())
    }

    /// Stop watching.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::info!("Module watcher stopped");
        }
        self.running.store(false, Ordering::Relaxed);
    }

    /// Watch a path.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();

        {
            let mut paths = self.watched_paths.write();
            if paths.contains(&path) {
                return Ok(());
            }
            paths.push(path.clone());
        }

        if self.is_running() {
            self.watch_path_internal(&path)?;
        }

        Ok(())
    }

    /// Stop watching a path.
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        self.watched_paths.write().retain(|p| p != path);

        if let Some(ref mut watcher) = self.watcher {
            watcher
                .unwatch(path)
                .map_err(|e| Error::Watch(e.to_string()))?;
        }

        Ok(())
    }

    /// Get watched paths.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths.read().clone()
    }

    fn watch_path_internal(&mut self, path: &Path) -> Result<()> {
        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        if let Some(ref mut watcher) = self.watcher {
            watcher
                .watch(path, mode)
                .map_err(|e| Error::Watch(format!("{}: {}", path.display(), e)))?;
            tracing::debug!("Watching {}", path.display());
        }

        Ok(())
    }
}

impl std::fmt::Debug for ModuleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleWatcher")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("watched_paths", &self.watched_paths.read().len())
            .finish()
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn modified(path: &str) -> WatchEvent {
        WatchEvent::Modified {
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_watch_config_builder() {
        let config = WatchConfig::new()
            .with_debounce(Duration::from_secs(1))
            .with_recursive(false)
            .with_extensions(vec!["so".to_string()]);

        assert_eq!(config.debounce, Duration::from_secs(1));
        assert!(!config.recursive);
        assert_eq!(config.extensions, vec!["so"]);
        assert!(WatchConfig::default().extensions.contains(&"toml".to_string()));
    }

    #[test]
    fn test_event_classification() {
        assert_eq!(modified("modules/liblighting.so").target(), WatchTarget::Library);
        assert_eq!(modified("modules/engine.toml").target(), WatchTarget::Manifest);
        assert_eq!(modified("modules/notes.txt").target(), WatchTarget::Other);

        let event = modified(&format!("{}lighting.so", std::env::consts::DLL_PREFIX));
        assert_eq!(event.module_name(), Some("lighting"));
        assert_eq!(modified("engine.toml").module_name(), None);
    }

    #[test]
    fn test_dispatch_filters_and_debounces() {
        let config = WatchConfig::new().with_debounce(Duration::from_millis(100));
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        let mut state = WatchState {
            last_events: HashMap::new(),
            handlers: vec![Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })],
        };

        let start = Instant::now();
        assert!(state.dispatch(&config, modified("a.so"), start));
        assert!(!state.dispatch(&config, modified("a.so"), start + Duration::from_millis(10)));
        assert!(state.dispatch(&config, modified("b.so"), start + Duration::from_millis(10)));
        assert!(!state.dispatch(&config, modified("readme.md"), start));
        assert!(state.dispatch(&config, modified("a.so"), start + Duration::from_millis(150)));

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_watch_paths() {
        let mut watcher = ModuleWatcher::default_config();
        assert!(!watcher.is_running());

        watcher.watch("/tmp/modules").unwrap();
        watcher.watch("/tmp/modules").unwrap();
        assert_eq!(watcher.watched_paths(), vec![PathBuf::from("/tmp/modules")]);

        watcher.unwatch("/tmp/modules").unwrap();
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn test_start_watches_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ModuleWatcher::default_config();
        watcher.watch(dir.path()).unwrap();

        watcher.start().unwrap();
        assert!(watcher.is_running());

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_start_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = ModuleWatcher::default_config();
        watcher.watch(dir.path().join("missing")).unwrap();

        assert!(matches!(watcher.start(), Err(Error::Watch(_))));
        assert!(!watcher.is_running());
    }
}
