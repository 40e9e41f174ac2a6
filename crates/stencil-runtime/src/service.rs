//! The serving facade.
//!
//! [`Engine`] owns the snapshot manager, the adaptive selector, and the
//! operator registry, and exposes the operations callers use: resolve a plan,
//! transform a document, select among competing configurations, record
//! feedback, and inspect or force reloads.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing::debug;

use stencil_core::{ContextKey, Document};
use stencil_engine::{resolver, OperatorRegistry, TransformSignals};
use stencil_packs::{EnvPolicy, Pack, PackStore, StoreConfig, ValidatorConfig};

use crate::bandit::{Policy, Selector};
use crate::errors::{EngineError, Result};
use crate::settings::EngineSettings;
use crate::snapshot::{EngineState, LastReload, ReloadOutcome, SnapshotManager};
use crate::watcher::{self, WatcherHandle};

/// A resolved operator plan with its merged directives.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPlan {
    /// Pack ids that applied, in merge order.
    pub packs_applied: Vec<String>,
    /// Operator names, in execution order.
    pub plan: Vec<String>,
    /// Merged directive payload.
    pub directives: Value,
    /// Planner degradation notes, rendered for callers.
    pub warnings: Vec<String>,
}

/// Output of one transform call.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOutcome {
    /// The transformed document.
    pub document: Document,
    /// Signals from the run (applied operators, warnings).
    pub signals: TransformSignals,
    /// Ordered trace of applied packs and operators.
    pub trace: Vec<String>,
}

/// Which fallback tier produced the eligible configuration set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackTier {
    /// Packs matching both model and category.
    Exact,
    /// Packs matching the model, any category.
    ModelAny,
    /// Packs matching the category, any model.
    AnyCategory,
    /// Every profiled pack.
    Any,
}

/// Result of one adaptive selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Chosen configuration (profile) id.
    pub config_id: String,
    /// Probability the policy had of producing this choice.
    pub propensity: f64,
    /// Explore or exploit.
    pub policy: Policy,
    /// The fallback tier the eligible set came from.
    pub tier: FallbackTier,
}

/// Point-in-time health summary.
#[derive(Clone, Debug)]
pub struct EngineDiagnostics {
    /// Generation of the current snapshot (0 when unloaded).
    pub generation: u64,
    /// Usable packs in the current snapshot.
    pub packs_valid: usize,
    /// Error-severity diagnostics in the current snapshot.
    pub packs_errored: usize,
    /// Most recent reload attempt, if any.
    pub last_reload: Option<LastReload>,
    /// Lifecycle state.
    pub state: EngineState,
}

/// The engine facade.
pub struct Engine {
    settings: EngineSettings,
    store: PackStore,
    manager: Arc<SnapshotManager>,
    selector: Selector,
    registry: OperatorRegistry,
    rng: Mutex<StdRng>,
}

impl Engine {
    /// Build an engine from settings. No load happens until
    /// [`Engine::force_reload`] (or the watcher) runs.
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_rng(settings, StdRng::from_os_rng())
    }

    /// Build an engine with a seeded RNG, for reproducible selection.
    pub fn with_seed(settings: EngineSettings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: EngineSettings, rng: StdRng) -> Self {
        let store = PackStore::new(
            settings.packs_dir.clone(),
            StoreConfig {
                max_file_bytes: settings.max_file_bytes,
                env_policy: EnvPolicy {
                    allowlist: settings.env_allowlist.clone(),
                    denylist: settings.env_denylist.clone(),
                },
                validator: ValidatorConfig {
                    strict: settings.strict,
                },
            },
        );
        let selector = Selector::new(&settings);
        Self {
            settings,
            store,
            manager: Arc::new(SnapshotManager::new()),
            selector,
            registry: OperatorRegistry::default(),
            rng: Mutex::new(rng),
        }
    }

    /// The adaptive selector, for runtime tuning.
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Start the configured reload trigger. Must run inside a tokio runtime.
    pub fn watch(&self) -> notify::Result<WatcherHandle> {
        watcher::spawn_watcher(
            Arc::clone(&self.manager),
            self.store.clone(),
            &self.settings,
        )
    }

    /// Synchronously reload from disk.
    ///
    /// A rejected reload (zero valid packs) is an error; the prior snapshot,
    /// if any, stays in place either way.
    pub fn force_reload(&self) -> Result<EngineDiagnostics> {
        match self.manager.reload(&self.store) {
            ReloadOutcome::Published { .. } => Ok(self.diagnostics()),
            ReloadOutcome::Rejected { reason } => Err(EngineError::ReloadRejected { reason }),
        }
    }

    /// Health summary for the current snapshot.
    pub fn diagnostics(&self) -> EngineDiagnostics {
        let snapshot = self.manager.current();
        EngineDiagnostics {
            generation: snapshot.as_ref().map_or(0, |s| s.generation),
            packs_valid: snapshot.as_ref().map_or(0, |s| s.packs.len()),
            packs_errored: snapshot.as_ref().map_or(0, |s| s.error_count()),
            last_reload: self.manager.last_reload(),
            state: self.manager.state(),
        }
    }

    /// Resolve the operator plan and merged directives for a context.
    ///
    /// Packs labeled with a profile are skipped; use
    /// [`Engine::resolve_plan_for`] after a [`Engine::select`] to resolve
    /// under a chosen configuration.
    pub fn resolve_plan(
        &self,
        model: &str,
        category: &str,
        overrides: Option<&Value>,
    ) -> Result<ResolvedPlan> {
        self.resolve_plan_for(model, category, None, overrides)
    }

    /// Resolve under a chosen competing configuration: packs carrying the
    /// given profile apply alongside the unlabeled ones; other profiles stay
    /// out.
    pub fn resolve_plan_for(
        &self,
        model: &str,
        category: &str,
        profile: Option<&str>,
        overrides: Option<&Value>,
    ) -> Result<ResolvedPlan> {
        let snapshot = self.manager.current().ok_or(EngineError::NotLoaded)?;
        let started = Instant::now();
        let key = ContextKey::new(model, category);
        let resolution = resolver::resolve(&key, &snapshot.packs, profile, overrides);
        histogram!("stencil_resolve_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(ResolvedPlan {
            warnings: resolution.notes.iter().map(ToString::to_string).collect(),
            packs_applied: resolution.packs_applied,
            plan: resolution.plan,
            directives: resolution.directives,
        })
    }

    /// Resolve a plan for the context and run it over the document.
    pub fn transform(
        &self,
        model: &str,
        category: &str,
        mut document: Document,
        overrides: Option<&Value>,
    ) -> Result<TransformOutcome> {
        let resolved = self.resolve_plan(model, category, overrides)?;
        let started = Instant::now();

        document.model = Some(model.to_string());
        document.category = Some(category.to_string());
        document.packs_applied = resolved.packs_applied.clone();
        let (document, signals) = self.registry.run_plan(document, &resolved.plan);

        let trace: Vec<String> = resolved
            .packs_applied
            .iter()
            .map(|id| format!("pack:{id}"))
            .chain(signals.applied.iter().map(|op| format!("op:{op}")))
            .collect();
        histogram!("stencil_transform_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(TransformOutcome {
            document,
            signals,
            trace,
        })
    }

    /// Pick one of the competing configurations for a context.
    ///
    /// Eligible configurations are the distinct profile labels of matching
    /// packs, discovered through fallback tiers: exact → model+any →
    /// any+category → any. An empty result at every tier is
    /// [`EngineError::NoConfiguration`].
    pub fn select(&self, assistant: &str, category: &str) -> Result<Selection> {
        let snapshot = self.manager.current().ok_or(EngineError::NotLoaded)?;
        let (eligible, tier) = eligible_profiles(&snapshot.packs, assistant, category)
            .ok_or_else(|| EngineError::NoConfiguration {
                assistant: assistant.to_string(),
                category: category.to_string(),
            })?;

        let key = ContextKey::new(assistant, category);
        let mut rng = self.rng.lock();
        let choice = self
            .selector
            .select(&key.to_string(), &eligible, &mut *rng)
            .ok_or(EngineError::NotLoaded)?;
        debug!(%key, config = %choice.config_id, ?tier, "configuration selected");
        Ok(Selection {
            config_id: choice.config_id,
            propensity: choice.propensity,
            policy: choice.policy,
            tier,
        })
    }

    /// Record an observed reward for a configuration under a context.
    ///
    /// `components` are the raw scoring signals behind the reward; they are
    /// logged for offline analysis but only the composite drives the arms.
    pub fn record_feedback(
        &self,
        assistant: &str,
        category: &str,
        config_id: &str,
        reward: f64,
        components: &BTreeMap<String, f64>,
    ) {
        let key = ContextKey::new(assistant, category);
        if !components.is_empty() {
            debug!(%key, config = config_id, reward, ?components, "feedback components");
        }
        self.selector
            .record_feedback(&key.to_string(), config_id, reward);
    }
}

/// Distinct profile labels of packs matching the context, walked through the
/// fallback tiers. Returns `None` when no tier yields any profile.
fn eligible_profiles(
    packs: &[Pack],
    assistant: &str,
    category: &str,
) -> Option<(Vec<String>, FallbackTier)> {
    let tiers = [
        FallbackTier::Exact,
        FallbackTier::ModelAny,
        FallbackTier::AnyCategory,
        FallbackTier::Any,
    ];

    for tier in tiers {
        let mut profiles: Vec<String> = packs
            .iter()
            .filter(|p| match tier {
                FallbackTier::Exact => {
                    p.matcher.matches_model(assistant) && p.matcher.matches_category(category)
                }
                FallbackTier::ModelAny => p.matcher.matches_model(assistant),
                FallbackTier::AnyCategory => p.matcher.matches_category(category),
                FallbackTier::Any => true,
            })
            .filter_map(|p| p.profile.clone())
            .collect();
        profiles.sort();
        profiles.dedup();
        if !profiles.is_empty() {
            return Some((profiles, tier));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use stencil_packs::Matcher;

    fn profiled(id: &str, model: &str, category: &str, profile: &str) -> Pack {
        Pack {
            id: id.to_string(),
            matcher: Matcher {
                model: if model.is_empty() {
                    Vec::new()
                } else {
                    vec![model.to_string()]
                },
                category: if category.is_empty() {
                    Vec::new()
                } else {
                    vec![category.to_string()]
                },
            },
            profile: Some(profile.to_string()),
            source: PathBuf::from(format!("{id}.json")),
            ..Pack::default()
        }
    }

    #[test]
    fn exact_tier_wins_when_available() {
        let packs = vec![
            profiled("a", "chatgpt", "coding", "fast"),
            profiled("b", "chatgpt", "", "broad"),
        ];
        let (profiles, tier) =
            eligible_profiles(&packs, "chatgpt", "coding").expect("profiles");
        assert_eq!(tier, FallbackTier::Exact);
        // "b" matches exactly too (empty category matches everything).
        assert_eq!(profiles, ["broad", "fast"]);
    }

    #[test]
    fn falls_back_through_tiers() {
        let packs = vec![profiled("a", "claude", "law", "careful")];
        let (profiles, tier) = eligible_profiles(&packs, "chatgpt", "law").expect("profiles");
        assert_eq!(tier, FallbackTier::AnyCategory);
        assert_eq!(profiles, ["careful"]);

        let (_, tier) = eligible_profiles(&packs, "chatgpt", "coding").expect("profiles");
        assert_eq!(tier, FallbackTier::Any);
    }

    #[test]
    fn no_profiled_packs_means_no_configuration() {
        let unprofiled = Pack {
            id: "plain".to_string(),
            ..Pack::default()
        };
        assert!(eligible_profiles(&[unprofiled], "chatgpt", "coding").is_none());
    }

    #[test]
    fn profiles_are_deduped_across_packs() {
        let packs = vec![
            profiled("a", "chatgpt", "coding", "fast"),
            profiled("b", "chatgpt", "coding", "fast"),
        ];
        let (profiles, _) = eligible_profiles(&packs, "chatgpt", "coding").expect("profiles");
        assert_eq!(profiles, ["fast"]);
    }
}
