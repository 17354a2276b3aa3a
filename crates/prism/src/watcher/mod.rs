//! Intake folder watcher.
//!
//! A single cooperative loop scans the top level of every watch root each
//! poll interval and feeds file sizes into a [`StabilityTracker`]. In
//! `notify` mode OS change events trigger extra scans; stability is still
//! decided by the tracker.

pub mod filter;
pub mod stability;

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info_span, Instrument};
use walkdir::WalkDir;

pub use filter::{is_in_reserved_dir, WatchFilter};
pub use stability::{Observation, StabilityTracker};

use crate::config::{IntakeConfig, WatchMode};
use crate::error::{ConfigError, WatchError};
use crate::sanitize::redact_path;
use crate::secrets::expand_home;

const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(500);

/// A file whose writes appear complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyFile {
    pub path: PathBuf,
    pub size: u64,
    /// False when the max wait elapsed before the size settled.
    pub stable: bool,
}

pub struct DirectoryWatcher {
    roots: Vec<PathBuf>,
    filter: WatchFilter,
    tracker: StabilityTracker,
    in_flight: HashSet<PathBuf>,
    poll_interval: Duration,
    mode: WatchMode,
}

impl DirectoryWatcher {
    pub fn new(roots: Vec<PathBuf>, filter: WatchFilter, tracker: StabilityTracker, poll_interval: Duration) -> Self {
        Self {
            roots,
            filter,
            tracker,
            in_flight: HashSet::new(),
            poll_interval,
            mode: WatchMode::Poll,
        }
    }

    pub fn from_config(config: &IntakeConfig) -> Result<Self, ConfigError> {
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
        let tracker = StabilityTracker::new(
            config.stability_polls,
            poll_interval,
            Duration::from_millis(config.max_stability_wait_ms),
        );
        let roots = config
            .watch_directories
            .iter()
            .map(|d| PathBuf::from(expand_home(d)))
            .collect();
        let mut watcher = Self::new(roots, WatchFilter::new(&config.ignore_patterns)?, tracker, poll_interval);
        watcher.mode = config.watch_mode;
        Ok(watcher)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Paths handed out and not yet gone from the watch root.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Accepted top-level files across every root, ignoring stability.
    pub fn candidates(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .flat_map(|root| scan_top_level(root, &self.filter))
            .map(|(path, _)| path)
            .collect()
    }

    /// One poll at `now`. Returns the files that became ready.
    pub fn poll(&mut self, now: Instant) -> Vec<ReadyFile> {
        let seen: Vec<(PathBuf, u64)> = self
            .roots
            .iter()
            .flat_map(|root| scan_top_level(root, &self.filter))
            .collect();
        let present: HashSet<&Path> = seen.iter().map(|(p, _)| p.as_path()).collect();

        // Archived or removed files leave the in-flight set.
        self.in_flight.retain(|p| present.contains(p.as_path()));
        self.tracker.retain(|p| present.contains(p));

        let mut ready = Vec::new();
        for (path, size) in &seen {
            if self.in_flight.contains(path) {
                continue;
            }
            let stable = match self.tracker.observe(path, *size, now) {
                Observation::Pending => continue,
                Observation::Stable => true,
                Observation::TimedOut => {
                    warn!(
                        "{} still changing after {:?}, processing anyway",
                        redact_path(path),
                        self.tracker.max_wait()
                    );
                    false
                }
            };
            debug!("{} is ready ({} bytes)", redact_path(path), size);
            self.in_flight.insert(path.clone());
            ready.push(ReadyFile {
                path: path.clone(),
                size: *size,
                stable,
            });
        }
        ready
    }

    /// Runs until `shutdown` flips to true. `on_ready` errors release the
    /// path so a later poll picks it up again.
    pub async fn run<F, E>(mut self, mut on_ready: F, mut shutdown: watch::Receiver<bool>) -> Result<(), WatchError>
    where
        F: FnMut(&ReadyFile) -> Result<(), E>,
        E: Display,
    {
        for root in &self.roots {
            if !root.is_dir() {
                warn!("Watch root {} does not exist yet", root.display());
            }
        }

        let (_debouncer, mut changes) = match self.mode {
            WatchMode::Notify => {
                let (debouncer, rx) = start_notifications(&self.roots)?;
                (Some(debouncer), Some(rx))
            }
            WatchMode::Poll => (None, None),
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let span = info_span!("watcher", roots = self.roots.len(), mode = ?self.mode);
        async {
            info!("Watching {} folder(s)", self.roots.len());
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Watcher shutting down");
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                    Some(()) = next_change(&mut changes) => {}
                }

                for file in self.poll(Instant::now()) {
                    if let Err(e) = on_ready(&file) {
                        error!("Could not queue {}: {}", redact_path(&file.path), e);
                        self.in_flight.remove(&file.path);
                    }
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Lists accepted top-level files of `root` with their sizes. Scan errors
/// are logged and skipped.
pub fn scan_top_level(root: &Path, filter: &WatchFilter) -> Vec<(PathBuf, u64)> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot scan {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !filter.accepts(entry.path()) {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => found.push((entry.path().to_path_buf(), metadata.len())),
            // Vanished between listing and stat.
            Err(e) => debug!("Skipping {}: {}", redact_path(entry.path()), e),
        }
    }
    found.sort();
    found
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

type NotifyHandle = Debouncer<notify::RecommendedWatcher>;

fn start_notifications(roots: &[PathBuf]) -> Result<(NotifyHandle, mpsc::UnboundedReceiver<()>), WatchError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(NOTIFY_DEBOUNCE, move |result: DebounceEventResult| match result {
        Ok(events) => {
            if events.iter().any(|e| matches!(e.kind, DebouncedEventKind::Any)) {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!("Watch error: {:?}", e),
    })
    .map_err(|e| WatchError::Notify(e.to_string()))?;

    for root in roots {
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root.clone()));
        }
        debouncer
            .watcher()
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Notify(e.to_string()))?;
    }
    Ok((debouncer, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SECOND: Duration = Duration::from_secs(1);

    fn watcher(root: &Path) -> DirectoryWatcher {
        DirectoryWatcher::new(
            vec![root.to_path_buf()],
            WatchFilter::default(),
            StabilityTracker::new(3, SECOND, Duration::from_secs(10)),
            SECOND,
        )
    }

    #[test]
    fn test_scan_ignores_subdirectories_and_archive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();
        std::fs::write(dir.path().join("archive/old.csv"), "a").unwrap();
        std::fs::write(dir.path().join("new.csv"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden.csv"), "a").unwrap();

        let candidates = watcher(dir.path()).candidates();
        assert_eq!(candidates, vec![dir.path().join("new.csv")]);
    }

    #[test]
    fn test_ready_once_then_in_flight() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("pl.csv");
        std::fs::write(&file, "a,b\n1,2\n").unwrap();
        let mut w = watcher(dir.path());
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(w.poll(t0 + SECOND * i).is_empty());
        }
        let ready = w.poll(t0 + SECOND * 3);
        assert_eq!(ready.len(), 1);
        assert!(ready[0].stable);

        // Still present: never handed out twice.
        for i in 4..20 {
            assert!(w.poll(t0 + SECOND * i).is_empty());
        }
        assert_eq!(w.in_flight(), 1);

        std::fs::remove_file(&file).unwrap();
        w.poll(t0 + SECOND * 21);
        assert_eq!(w.in_flight(), 0);
    }

    #[test]
    fn test_missing_root_does_not_panic() {
        let mut w = watcher(Path::new("/nonexistent/prism-watch"));
        assert!(w.poll(Instant::now()).is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(watcher(dir.path()).run(|_| Ok::<(), String>(()), rx));
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
