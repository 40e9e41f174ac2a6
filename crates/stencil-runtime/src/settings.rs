//! Engine settings with environment overrides.
//!
//! Defaults are embedded; every knob can be overridden through a `STENCIL_*`
//! env var. Invalid values are ignored with a warning rather than failing
//! startup, so a typo in one variable never takes the engine down.

use std::path::PathBuf;

use stencil_packs::StrictMode;

/// Which reload trigger drives the watcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriggerKind {
    /// Filesystem notifications (push).
    #[default]
    Watch,
    /// Periodic mtime scan (pull).
    Poll,
}

/// All runtime knobs in one place.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Directory holding the pack files.
    pub packs_dir: PathBuf,
    /// Strict-mode exclusion scope for semantic warnings.
    pub strict: StrictMode,
    /// Whether adaptive selection runs at all. When off, `select` returns
    /// the lowest eligible config id with policy `disabled`.
    pub selection_enabled: bool,
    /// Exploration probability for the adaptive selector.
    pub epsilon: f64,
    /// Samples below which a config uses the optimistic prior as its mean.
    pub min_samples: u64,
    /// Assumed mean reward for under-sampled configs.
    pub optimistic_prior: f64,
    /// Rewards below this count against the safety filter.
    pub low_reward_threshold: f64,
    /// Selections a config sits out after tripping the safety filter.
    pub exclusion_window: u64,
    /// Debounce window for reload triggers, in milliseconds.
    pub debounce_ms: u64,
    /// Push or pull reload trigger.
    pub trigger: TriggerKind,
    /// Env substitution allowlist (names/prefixes). Empty = allow all.
    pub env_allowlist: Vec<String>,
    /// Env substitution denylist (names/prefixes).
    pub env_denylist: Vec<String>,
    /// Per-pack-file size cap in bytes.
    pub max_file_bytes: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            packs_dir: PathBuf::from("packs"),
            strict: StrictMode::CriticalOnly,
            selection_enabled: true,
            epsilon: 0.1,
            min_samples: 3,
            optimistic_prior: 0.6,
            low_reward_threshold: 0.2,
            exclusion_window: 10,
            debounce_ms: 200,
            trigger: TriggerKind::Watch,
            env_allowlist: Vec::new(),
            env_denylist: Vec::new(),
            max_file_bytes: 262_144,
        }
    }
}

impl EngineSettings {
    /// Defaults for `dir`, then `STENCIL_*` env overrides applied on top.
    pub fn from_env(dir: impl Into<PathBuf>) -> Self {
        let mut settings = Self {
            packs_dir: dir.into(),
            ..Self::default()
        };
        settings.apply_env();
        settings
    }

    fn apply_env(&mut self) {
        if let Some(v) = read_env_string("STENCIL_STRICT") {
            match parse_strict_mode(&v) {
                Some(mode) => self.strict = mode,
                None => {
                    tracing::warn!(value = %v, "invalid STENCIL_STRICT, ignoring");
                }
            }
        }
        if let Some(v) = read_env_bool("STENCIL_SELECTION_ENABLED") {
            self.selection_enabled = v;
        }
        if let Some(v) = read_env_f64("STENCIL_EPSILON", 0.0, 1.0) {
            self.epsilon = v;
        }
        if let Some(v) = read_env_u64("STENCIL_MIN_SAMPLES", 1, 10_000) {
            self.min_samples = v;
        }
        if let Some(v) = read_env_f64("STENCIL_OPTIMISTIC_PRIOR", 0.0, 1.0) {
            self.optimistic_prior = v;
        }
        if let Some(v) = read_env_f64("STENCIL_LOW_REWARD_THRESHOLD", 0.0, 1.0) {
            self.low_reward_threshold = v;
        }
        if let Some(v) = read_env_u64("STENCIL_EXCLUSION_WINDOW", 1, 100_000) {
            self.exclusion_window = v;
        }
        if let Some(v) = read_env_u64("STENCIL_DEBOUNCE_MS", 10, 60_000) {
            self.debounce_ms = v;
        }
        if let Some(v) = read_env_string("STENCIL_TRIGGER") {
            match parse_trigger(&v) {
                Some(kind) => self.trigger = kind,
                None => {
                    tracing::warn!(value = %v, "invalid STENCIL_TRIGGER, ignoring");
                }
            }
        }
        if let Some(v) = read_env_string("STENCIL_ENV_ALLOWLIST") {
            self.env_allowlist = parse_name_list(&v);
        }
        if let Some(v) = read_env_string("STENCIL_ENV_DENYLIST") {
            self.env_denylist = parse_name_list(&v);
        }
        if let Some(v) = read_env_u64("STENCIL_MAX_FILE_BYTES", 1024, 16_777_216) {
            self.max_file_bytes = v;
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a strict-mode name (case-insensitive): `off`, `all`, `critical`.
pub fn parse_strict_mode(val: &str) -> Option<StrictMode> {
    match val.to_lowercase().as_str() {
        "off" => Some(StrictMode::Off),
        "all" => Some(StrictMode::All),
        "critical" | "critical_only" => Some(StrictMode::CriticalOnly),
        _ => None,
    }
}

/// Parse a trigger name (case-insensitive): `watch`, `poll`.
pub fn parse_trigger(val: &str) -> Option<TriggerKind> {
    match val.to_lowercase().as_str() {
        "watch" | "fs" => Some(TriggerKind::Watch),
        "poll" | "mtime" => Some(TriggerKind::Poll),
        _ => None,
    }
}

/// Parse a string as an `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated name list, trimming and dropping empties.
pub fn parse_name_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
