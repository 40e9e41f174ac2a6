//! Reload triggers: filesystem notifications or mtime polling, funneled
//! through one debounced entry point.
//!
//! Both trigger kinds only emit change hints into a channel; the debounce
//! task is the single place that initiates reloads. A burst of events inside
//! the debounce window coalesces into one reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use walkdir::WalkDir;

use stencil_packs::PackStore;

use crate::settings::{EngineSettings, TriggerKind};
use crate::snapshot::SnapshotManager;

/// Smallest poll period, regardless of the debounce setting.
const MIN_POLL_MS: u64 = 100;

/// Keeps the trigger and debounce tasks alive. Dropping the handle stops
/// watching; shutdown is also available explicitly.
pub struct WatcherHandle {
    tasks: Vec<JoinHandle<()>>,
    // Held for its side effect: dropping a notify watcher unregisters it.
    _fs_watcher: Option<RecommendedWatcher>,
}

impl WatcherHandle {
    /// Stop all watcher tasks.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start watching the store's directory and reloading on changes.
///
/// Must be called from within a tokio runtime. The trigger kind and debounce
/// window come from settings.
pub fn spawn_watcher(
    manager: Arc<SnapshotManager>,
    store: PackStore,
    settings: &EngineSettings,
) -> notify::Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<()>(16);
    let mut tasks = Vec::new();
    let mut fs_watcher = None;

    match settings.trigger {
        TriggerKind::Watch => {
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                match res {
                    Ok(event) if is_relevant(&event) => {
                        // Full channel means a reload hint is already queued.
                        let _ = tx.try_send(());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "filesystem watch error"),
                }
            })?;
            watcher.watch(store.dir(), RecursiveMode::Recursive)?;
            fs_watcher = Some(watcher);
        }
        TriggerKind::Poll => {
            let dir = store.dir().to_path_buf();
            let period = Duration::from_millis(settings.debounce_ms.max(MIN_POLL_MS));
            tasks.push(tokio::spawn(poll_loop(dir, period, tx)));
        }
    }

    let debounce = Duration::from_millis(settings.debounce_ms);
    tasks.push(tokio::spawn(debounce_loop(rx, debounce, manager, store)));

    Ok(WatcherHandle {
        tasks,
        _fs_watcher: fs_watcher,
    })
}

/// Coalesce hint bursts, then reload. The only reload initiator.
async fn debounce_loop(
    mut rx: mpsc::Receiver<()>,
    window: Duration,
    manager: Arc<SnapshotManager>,
    store: PackStore,
) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(window).await;
        while rx.try_recv().is_ok() {}
        debug!(dir = %store.dir().display(), "debounce window closed, reloading");
        let _ = manager.reload(&store);
    }
}

/// Emit a hint whenever the directory's mtime fingerprint changes.
async fn poll_loop(dir: PathBuf, period: Duration, tx: mpsc::Sender<()>) {
    let mut last = fingerprint(&dir);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        let _ = ticker.tick().await;
        let next = fingerprint(&dir);
        if next != last {
            last = next;
            if tx.send(()).await.is_err() {
                return;
            }
        }
    }
}

/// Create/modify/remove events touching a `.json` file (or with no path
/// detail at all) are worth a reload hint.
fn is_relevant(event: &Event) -> bool {
    let kind_matters = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    if !kind_matters {
        return false;
    }
    event.paths.is_empty()
        || event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "json"))
}

/// Sorted path → mtime map over the directory's `.json` files.
fn fingerprint(dir: &Path) -> BTreeMap<PathBuf, SystemTime> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((e.into_path(), mtime))
        })
        .collect()
}
