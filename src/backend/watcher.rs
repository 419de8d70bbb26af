//! File watcher used as a freshness signal.
//!
//! Watches the directory containing a configuration file and raises a change
//! flag when an event touches that file. Watching the directory rather than the
//! file keeps working when editors replace the file atomically.
//! Uses debouncing to coalesce rapid file changes.

use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, Debouncer, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default debounce window for coalescing rapid changes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Handle keeping a watch alive. Dropping it stops the watch.
pub struct FileWatch {
    path: PathBuf,
    changed: Arc<AtomicBool>,
    _debouncer: Option<Mutex<Debouncer<notify::RecommendedWatcher>>>,
}

impl FileWatch {
    /// Start watching `path` with the default debounce window.
    pub fn start(path: impl Into<PathBuf>) -> Result<Self, notify::Error> {
        Self::start_with_debounce(path, DEFAULT_DEBOUNCE)
    }

    /// Start watching `path`.
    ///
    /// A missing parent directory is logged and leaves the watch inert: the
    /// flag never rises and the file is treated as unchanged.
    pub fn start_with_debounce(
        path: impl Into<PathBuf>,
        debounce: Duration,
    ) -> Result<Self, notify::Error> {
        let path = path.into();
        let changed = Arc::new(AtomicBool::new(false));

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            warn!(
                "Config directory does not exist, skipping watch: {}",
                dir.display()
            );
            return Ok(Self {
                path,
                changed,
                _debouncer: None,
            });
        }

        let (notify_tx, notify_rx) = mpsc::channel();
        let mut debouncer = new_debouncer(debounce, notify_tx)?;
        debouncer
            .watcher()
            .watch(&dir, notify::RecursiveMode::NonRecursive)?;
        info!("Watching config file: {}", path.display());

        let flag = Arc::clone(&changed);
        let watched = path.clone();
        std::thread::spawn(move || process_notify_events(notify_rx, &flag, &watched));

        Ok(Self {
            path,
            changed,
            _debouncer: Some(Mutex::new(debouncer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once a change has been seen since the last [`reset`](Self::reset).
    pub fn has_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Clear the change flag, typically right before reading the file.
    pub fn reset(&self) {
        self.changed.store(false, Ordering::SeqCst);
    }

    /// Raise the change flag by hand.
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }
}

/// Drain debounced events until the debouncer is dropped.
fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    changed: &AtomicBool,
    watched: &Path,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let touched = events.iter().any(|event| {
                    matches!(
                        event.kind,
                        DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                    ) && is_same_file(&event.path, watched)
                });
                if touched {
                    debug!("Config change detected: {}", watched.display());
                    changed.store(true, Ordering::SeqCst);
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
            }
            Err(_) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Event paths may be absolute while the watched path is relative, so compare
/// file names.
fn is_same_file(event_path: &Path, watched: &Path) -> bool {
    event_path == watched || event_path.file_name() == watched.file_name()
}
