//! # stencil-runtime
//!
//! The serving layer: atomic snapshot hot-reload, filesystem reload
//! triggers, ε-greedy adaptive selection, and the [`Engine`] facade that
//! ties the store, resolver, and transform engine together.
//!
//! Readers always see a complete, internally consistent snapshot; a reload
//! that fails validation entirely is rejected and the last-known-good
//! snapshot keeps serving.
//!
//! ## Module Overview
//!
//! - [`snapshot`] — immutable snapshots, atomic publication, reload outcomes
//! - [`watcher`] — notify/poll reload triggers behind one debounced entry
//! - [`bandit`] — per-context ε-greedy selection with a safety filter
//! - [`service`] — the [`Engine`] facade
//! - [`settings`] — defaults plus `STENCIL_*` env overrides
//! - [`errors`] — the facade error taxonomy
//! - [`logging`] — tracing subscriber setup for embedding applications
//!
//! ## Crate Position
//!
//! Depends on: stencil-core, stencil-packs, stencil-engine.
//! Top of the stack; embedding applications depend on this crate.

#![deny(unsafe_code)]

pub mod bandit;
pub mod errors;
pub mod logging;
pub mod service;
pub mod settings;
pub mod snapshot;
pub mod watcher;

pub use bandit::{BanditRecord, Choice, Policy, Selector};
pub use errors::{EngineError, Result};
pub use service::{
    Engine, EngineDiagnostics, FallbackTier, ResolvedPlan, Selection, TransformOutcome,
};
pub use settings::{EngineSettings, TriggerKind};
pub use snapshot::{EngineState, ReloadOutcome, Snapshot, SnapshotManager};
pub use watcher::WatcherHandle;
