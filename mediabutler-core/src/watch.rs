//! Filesystem discovery: native notifications plus a periodic compensation
//! scan, both feeding one debounce map so a burst of writes on a path
//! collapses into a single discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use regex::Regex;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use mediabutler_config::DiscoveryConfig;
use mediabutler_model::FileStatus;

use crate::error::{ButlerError, Result};
use crate::events::DomainEvent;
use crate::fsx::FileSystem;
use crate::queue::{Job, JobPayload, JobQueue};
use crate::service::FileService;
use crate::store::Store;

/// Coalesces repeated signals per path until a quiet window elapses.
/// Pure bookkeeping so the debounce contract is testable without a
/// filesystem.
#[derive(Debug, Default)]
pub struct DebounceMap {
    deadlines: HashMap<PathBuf, Instant>,
}

impl DebounceMap {
    pub fn touch(&mut self, path: PathBuf, now: Instant, window: Duration) {
        self.deadlines.insert(path, now + window);
    }

    /// Paths whose quiet window has elapsed; removed from the map.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let due: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.deadlines.remove(path);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Discovery filters compiled once at startup.
#[derive(Debug)]
pub struct DiscoveryFilter {
    extensions: Vec<String>,
    exclude: Vec<Regex>,
    min_file_size_bytes: u64,
}

impl DiscoveryFilter {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let extensions = config
            .file_extensions
            .iter()
            .map(|ext| ext.to_lowercase())
            .collect();
        let exclude = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    ButlerError::Validation(format!("invalid exclude pattern {pattern:?}: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            extensions,
            exclude,
            min_file_size_bytes: config.min_file_size_mb * 1024 * 1024,
        })
    }

    pub fn extension_matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return false;
        };
        let dotted = format!(".{ext}");
        self.extensions.iter().any(|allowed| *allowed == dotted)
    }

    pub fn excluded(&self, path: &Path) -> bool {
        let rendered = path.to_string_lossy();
        self.exclude.iter().any(|pattern| pattern.is_match(&rendered))
    }

    pub fn size_ok(&self, len: u64) -> bool {
        len >= self.min_file_size_bytes
    }
}

pub struct WatcherService {
    config: DiscoveryConfig,
    watch_folders: Vec<PathBuf>,
    fs: Arc<dyn FileSystem>,
    store: Arc<Store>,
    service: Arc<FileService>,
    queue: JobQueue,
}

impl std::fmt::Debug for WatcherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherService")
            .field("watch_folders", &self.watch_folders)
            .finish()
    }
}

/// Running watcher tasks; dropping the notify watchers stops the event
/// streams.
pub struct WatcherHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    _watchers: Vec<RecommendedWatcher>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl WatcherHandle {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in &self.tasks {
            task.abort();
        }
        info!("watcher stopped");
    }
}

impl WatcherService {
    pub fn new(
        config: DiscoveryConfig,
        watch_folders: Vec<PathBuf>,
        fs: Arc<dyn FileSystem>,
        store: Arc<Store>,
        service: Arc<FileService>,
        queue: JobQueue,
    ) -> Self {
        Self {
            config,
            watch_folders,
            fs,
            store,
            service,
            queue,
        }
    }

    /// Start the event loop (when enabled) and the periodic scan loop.
    pub fn start(self) -> Result<WatcherHandle> {
        let filter = Arc::new(DiscoveryFilter::new(&self.config)?);
        let (raw_tx, raw_rx) = mpsc::channel::<PathBuf>(1024);
        let (stop_tx, stop_rx) = watch::channel(false);

        let watchers = if self.config.enable_event_watcher {
            init_watchers(&self.watch_folders, raw_tx.clone())?
        } else {
            Vec::new()
        };

        let shared = Arc::new(self);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(debounce_loop(
            Arc::clone(&shared),
            Arc::clone(&filter),
            raw_rx,
            stop_rx.clone(),
        )));

        tasks.push(tokio::spawn(scan_loop(
            Arc::clone(&shared),
            Arc::clone(&filter),
            raw_tx,
            stop_rx,
        )));

        Ok(WatcherHandle {
            stop: stop_tx,
            tasks,
            _watchers: watchers,
        })
    }
}

fn init_watchers(
    folders: &[PathBuf],
    tx: mpsc::Sender<PathBuf>,
) -> Result<Vec<RecommendedWatcher>> {
    let mut watchers = Vec::with_capacity(folders.len());
    for folder in folders {
        let folder_for_log = folder.clone();
        let tx_event = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !is_discovery_event(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if let Err(err) = tx_event.blocking_send(path) {
                            warn!(
                                "watch channel send failed for {}: {}",
                                folder_for_log.display(),
                                err
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!("filesystem watch error: {err}");
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| {
            ButlerError::Internal(format!(
                "failed to create watcher for {}: {err}",
                folder.display()
            ))
        })?;

        watcher
            .watch(folder, RecursiveMode::Recursive)
            .map_err(|err| {
                ButlerError::Internal(format!("failed to watch {}: {err}", folder.display()))
            })?;

        watchers.push(watcher);
    }
    Ok(watchers)
}

fn is_discovery_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
    )
}

async fn debounce_loop(
    watcher: Arc<WatcherService>,
    filter: Arc<DiscoveryFilter>,
    mut rx: mpsc::Receiver<PathBuf>,
    mut stop: watch::Receiver<bool>,
) {
    let window = Duration::from_secs(watcher.config.debounce_seconds.max(1));
    let scan_permits = Arc::new(Semaphore::new(watcher.config.max_concurrent_scans.max(1)));
    let mut pending = DebounceMap::default();

    loop {
        let sleep_until = pending
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = stop.changed() => break,
            maybe_path = rx.recv() => {
                match maybe_path {
                    Some(path) => pending.touch(path, Instant::now(), window),
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(sleep_until), if !pending.is_empty() => {
                for path in pending.take_due(Instant::now()) {
                    let watcher = Arc::clone(&watcher);
                    let filter = Arc::clone(&filter);
                    let permits = Arc::clone(&scan_permits);
                    tokio::spawn(async move {
                        let Ok(_permit) = permits.acquire().await else { return };
                        if let Err(err) = emit_discovery(&watcher, &filter, &path).await {
                            debug!(path = %path.display(), error = %err, "discovery skipped");
                        }
                    });
                }
            }
        }
    }
}

/// Hash, register, and enqueue classification for one settled path.
async fn emit_discovery(
    watcher: &WatcherService,
    filter: &DiscoveryFilter,
    path: &Path,
) -> Result<()> {
    if !filter.extension_matches(path) || filter.excluded(path) {
        return Ok(());
    }
    let stat = watcher.fs.stat(path).await?;
    if !stat.is_file || !filter.size_ok(stat.len) {
        return Ok(());
    }

    let file = watcher.service.register(path).await?;
    if file.status == FileStatus::New {
        watcher
            .queue
            .enqueue(Job::new(JobPayload::Classify {
                hash: file.hash.clone(),
            }))
            .await?;
    }
    Ok(())
}

/// Periodic full enumeration compensating for missed events.
async fn scan_loop(
    watcher: Arc<WatcherService>,
    filter: Arc<DiscoveryFilter>,
    tx: mpsc::Sender<PathBuf>,
    mut stop: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(watcher.config.scan_interval_minutes.max(1) * 60);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if *stop.borrow() {
            break;
        }
        if let Err(err) = run_scan(&watcher, &filter, &tx).await {
            warn!(error = %err, "periodic scan failed");
        }
    }
}

async fn run_scan(
    watcher: &WatcherService,
    filter: &DiscoveryFilter,
    tx: &mpsc::Sender<PathBuf>,
) -> Result<()> {
    let started = std::time::Instant::now();
    let mut total = 0usize;
    let mut new = 0usize;
    let mut existing = 0usize;

    for folder in &watcher.watch_folders {
        watcher
            .store
            .events()
            .publish(DomainEvent::ScanStarted {
                folder: folder.to_string_lossy().into_owned(),
                at: watcher.store.clock().now_utc(),
            })
            .await;

        let files = watcher.fs.enumerate_files(folder).await?;
        for path in files {
            if !filter.extension_matches(&path) || filter.excluded(&path) {
                continue;
            }
            total += 1;
            if watcher.store.file_exists_by_path(&path).await? {
                existing += 1;
                continue;
            }
            new += 1;
            // Feed the same debounce map the event loop uses.
            let _ = tx.send(path).await;
        }
    }

    watcher
        .store
        .events()
        .publish(DomainEvent::ScanFound { count: new })
        .await;
    watcher
        .store
        .events()
        .publish(DomainEvent::ScanCompleted {
            total,
            new,
            existing,
            duration_ms: started.elapsed().as_millis() as i64,
        })
        .await;
    debug!(total, new, existing, "scan completed");
    Ok(())
}
