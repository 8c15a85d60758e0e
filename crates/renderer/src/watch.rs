//! Shader directory watching.
//!
//! The notify callback runs on the watcher's own thread and only ever touches
//! a single-slot channel. The frame loop drains that slot once per frame, so a
//! burst of editor events collapses into one rebuild.

use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

/// Pending-rebuild flag shared between the watcher thread and the frame loop.
#[derive(Debug, Clone)]
pub struct RebuildSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl RebuildSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Marks a rebuild pending. Returns `false` when one was already pending.
    pub fn raise(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                trace!("rebuild already pending; coalescing signal");
                false
            }
            Err(TrySendError::Disconnected(())) => false,
        }
    }

    /// Consumes the pending flag, if any.
    pub fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl Default for RebuildSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches the shader directory and raises a [`RebuildSignal`] on any event.
///
/// Dropping the notifier stops the watcher thread.
pub struct ChangeNotifier {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ChangeNotifier {
    pub fn watch(dir: &Path, signal: RebuildSignal) -> notify::Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    debug!(kind = ?event.kind, paths = ?event.paths, "shader directory changed");
                    signal.raise();
                }
                Err(err) => warn!("shader watcher error: {err}"),
            })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "watching shader directory");

        Ok(Self {
            dir: dir.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn bursts_coalesce_into_one_request() {
        let signal = RebuildSignal::new();
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(!signal.clone().raise());

        assert!(signal.is_pending());
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!signal.is_pending());
    }

    #[test]
    fn signal_can_be_raised_again_after_take() {
        let signal = RebuildSignal::new();
        signal.raise();
        signal.take();
        assert!(signal.raise());
        assert!(signal.take());
    }

    #[test]
    fn watching_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent");
        assert!(ChangeNotifier::watch(&missing, RebuildSignal::new()).is_err());
    }

    #[test]
    fn file_written_in_watched_directory_raises_signal() {
        let dir = TempDir::new().unwrap();
        let signal = RebuildSignal::new();
        let notifier = ChangeNotifier::watch(dir.path(), signal.clone()).unwrap();
        assert_eq!(notifier.dir(), dir.path());

        std::fs::write(dir.path().join("fs.glsl"), "void main() {}\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !signal.is_pending() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(signal.is_pending());
        assert!(signal.take());
    }
}
