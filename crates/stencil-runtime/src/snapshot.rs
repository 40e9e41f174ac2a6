//! Atomic snapshot management for hot reloads.
//!
//! A [`Snapshot`] is an immutable view of everything loaded from disk,
//! shared behind an `Arc`. Readers clone the `Arc` under a short read lock
//! and keep working on their view for as long as they like; a reload builds
//! the next snapshot off to the side and publishes it with one pointer swap.
//! A reload that produces zero valid packs is rejected whole and the prior
//! snapshot stays in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use stencil_packs::{Diagnostic, Pack, PackStore, Severity};

/// One immutable generation of loaded configuration.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Strictly increasing across successful reloads.
    pub generation: u64,
    /// Usable packs.
    pub packs: Vec<Pack>,
    /// Every diagnostic from the load, excluded packs included.
    pub diagnostics: Vec<Diagnostic>,
    /// When this snapshot was published.
    pub loaded_at: DateTime<Utc>,
}

impl Snapshot {
    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

/// Result of one reload attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot was published.
    Published {
        /// Generation of the new snapshot.
        generation: u64,
    },
    /// The load was rejected; the prior snapshot (if any) is retained.
    Rejected {
        /// Why the load was rejected.
        reason: String,
    },
}

/// Lifecycle state, for observability only. `Ready` (last-known-good) is the
/// only steady state readers ever observe data in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    /// No successful load yet.
    #[default]
    Unloaded,
    /// First load in progress.
    Loading,
    /// Serving a snapshot.
    Ready,
    /// Serving the prior snapshot while a reload runs.
    Reloading,
}

/// Summary of the most recent reload attempt.
#[derive(Clone, Debug)]
pub struct LastReload {
    /// `published` or `rejected`.
    pub outcome: String,
    /// Rejection reason, when rejected.
    pub reason: Option<String>,
    /// Wall time of the load.
    pub duration_ms: u64,
    /// When the attempt finished.
    pub at: DateTime<Utc>,
}

/// Owns the current snapshot and serializes reloads.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    current: RwLock<Option<Arc<Snapshot>>>,
    state: RwLock<EngineState>,
    last_reload: RwLock<Option<LastReload>>,
    // Serializes reloads without ever blocking `current()` readers.
    reload_lock: Mutex<()>,
    generation: AtomicU64,
}

impl SnapshotManager {
    /// Create a manager with no snapshot loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, if one has ever been published.
    ///
    /// Holds the read lock only for the `Arc` clone, so a reload in flight
    /// never blocks readers.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Lifecycle state at this instant.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Summary of the most recent reload attempt.
    pub fn last_reload(&self) -> Option<LastReload> {
        self.last_reload.read().clone()
    }

    /// Run a full load from the store and publish the result atomically.
    ///
    /// Concurrent calls serialize; readers keep seeing the prior snapshot
    /// until the swap. A load with zero valid packs is rejected whole.
    pub fn reload(&self, store: &PackStore) -> ReloadOutcome {
        let _guard = self.reload_lock.lock();

        let had_snapshot = self.current.read().is_some();
        *self.state.write() = if had_snapshot {
            EngineState::Reloading
        } else {
            EngineState::Loading
        };

        let started = Instant::now();
        let result = store.load();
        let duration_ms = started.elapsed().as_millis() as u64;

        if result.packs.is_empty() {
            let reason = format!(
                "zero valid packs ({} diagnostics)",
                result.diagnostics.len()
            );
            warn!(%reason, dir = %store.dir().display(), "reload rejected");
            *self.state.write() = if had_snapshot {
                EngineState::Ready
            } else {
                EngineState::Unloaded
            };
            self.record_outcome("rejected", Some(reason.clone()), duration_ms);
            return ReloadOutcome::Rejected { reason };
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot {
            generation,
            loaded_at: Utc::now(),
            packs: result.packs,
            diagnostics: result.diagnostics,
        });

        gauge!("stencil_packs_valid").set(snapshot.packs.len() as f64);
        gauge!("stencil_packs_errored").set(snapshot.error_count() as f64);
        info!(
            generation,
            packs = snapshot.packs.len(),
            errors = snapshot.error_count(),
            duration_ms,
            "snapshot published"
        );

        *self.current.write() = Some(snapshot);
        *self.state.write() = EngineState::Ready;
        self.record_outcome("published", None, duration_ms);
        ReloadOutcome::Published { generation }
    }

    fn record_outcome(&self, outcome: &'static str, reason: Option<String>, duration_ms: u64) {
        counter!("stencil_reload_total", "outcome" => outcome).increment(1);
        histogram!("stencil_reload_duration_ms").record(duration_ms as f64);
        *self.last_reload.write() = Some(LastReload {
            outcome: outcome.to_string(),
            reason,
            duration_ms,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use stencil_packs::StoreConfig;

    fn write_pack(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).expect("write pack");
    }

    fn store(dir: &Path) -> PackStore {
        PackStore::new(dir, StoreConfig::default())
    }

    #[test]
    fn first_load_publishes_generation_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_pack(dir.path(), "a.json", r#"{"id": "a"}"#);
        let manager = SnapshotManager::new();
        assert!(manager.current().is_none());
        assert_eq!(manager.state(), EngineState::Unloaded);

        let outcome = manager.reload(&store(dir.path()));
        assert_eq!(outcome, ReloadOutcome::Published { generation: 1 });
        assert_eq!(manager.state(), EngineState::Ready);
        assert_eq!(manager.current().expect("snapshot").packs.len(), 1);
    }

    #[test]
    fn generation_strictly_increases() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_pack(dir.path(), "a.json", r#"{"id": "a"}"#);
        let manager = SnapshotManager::new();
        let s = store(dir.path());
        assert_eq!(manager.reload(&s), ReloadOutcome::Published { generation: 1 });
        assert_eq!(manager.reload(&s), ReloadOutcome::Published { generation: 2 });
    }

    #[test]
    fn all_invalid_reload_keeps_prior_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_pack(dir.path(), "a.json", r#"{"id": "a"}"#);
        let manager = SnapshotManager::new();
        let s = store(dir.path());
        let _ = manager.reload(&s);

        write_pack(dir.path(), "a.json", "{ broken");
        let outcome = manager.reload(&s);
        assert!(matches!(outcome, ReloadOutcome::Rejected { .. }));

        let snapshot = manager.current().expect("prior snapshot retained");
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.packs[0].id, "a");
        assert_eq!(manager.state(), EngineState::Ready);
        let last = manager.last_reload().expect("recorded");
        assert_eq!(last.outcome, "rejected");
    }

    #[test]
    fn rejected_first_load_stays_unloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = SnapshotManager::new();
        let outcome = manager.reload(&store(dir.path()));
        assert!(matches!(outcome, ReloadOutcome::Rejected { .. }));
        assert!(manager.current().is_none());
        assert_eq!(manager.state(), EngineState::Unloaded);
    }

    #[test]
    fn readers_hold_their_view_across_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_pack(dir.path(), "a.json", r#"{"id": "a", "priority": 1}"#);
        let manager = SnapshotManager::new();
        let s = store(dir.path());
        let _ = manager.reload(&s);

        let view = manager.current().expect("snapshot");
        write_pack(dir.path(), "a.json", r#"{"id": "a", "priority": 99}"#);
        let _ = manager.reload(&s);

        // The old Arc is untouched by the swap.
        assert_eq!(view.packs[0].priority, 1);
        assert_eq!(
            manager.current().expect("new snapshot").packs[0].priority,
            99
        );
    }
}
