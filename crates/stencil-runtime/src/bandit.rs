//! ε-greedy adaptive selection over competing configurations.
//!
//! State is per context key (one arm per configuration id), created lazily
//! and reset-only. A fixed last-3 reward window drives a safety filter: an
//! arm whose recent rewards are all below the threshold sits out the next
//! `exclusion_window` selections, then gets a fresh window. When the filter
//! empties the eligible set entirely, selection falls back to the unfiltered
//! set rather than failing.
//!
//! Tunables are runtime-adjustable without locking: `f64` knobs live in
//! atomics as raw bits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, histogram};
use rand::Rng;
use tracing::debug;

use crate::settings::EngineSettings;

/// Size of the recent-reward window the safety filter looks at.
const RECENT_WINDOW: usize = 3;

/// `f64` stored as raw bits in an `AtomicU64`.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Runtime-tunable selection knobs.
#[derive(Debug)]
pub struct Tunables {
    enabled: AtomicBool,
    epsilon: AtomicF64,
    optimistic_prior: AtomicF64,
    low_reward_threshold: AtomicF64,
    min_samples: AtomicU64,
    exclusion_window: AtomicU64,
}

impl Tunables {
    fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            enabled: AtomicBool::new(settings.selection_enabled),
            epsilon: AtomicF64::new(settings.epsilon),
            optimistic_prior: AtomicF64::new(settings.optimistic_prior),
            low_reward_threshold: AtomicF64::new(settings.low_reward_threshold),
            min_samples: AtomicU64::new(settings.min_samples),
            exclusion_window: AtomicU64::new(settings.exclusion_window),
        }
    }

    /// Whether adaptive selection is on.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn adaptive selection on or off without restarting.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Current exploration probability.
    pub fn epsilon(&self) -> f64 {
        self.epsilon.get()
    }

    /// Adjust the exploration probability (clamped to `[0, 1]`).
    pub fn set_epsilon(&self, epsilon: f64) {
        self.epsilon.set(epsilon.clamp(0.0, 1.0));
    }

    /// Adjust the cold-start prior mean (clamped to `[0, 1]`).
    pub fn set_optimistic_prior(&self, prior: f64) {
        self.optimistic_prior.set(prior.clamp(0.0, 1.0));
    }

    /// Adjust the safety-filter reward threshold (clamped to `[0, 1]`).
    pub fn set_low_reward_threshold(&self, threshold: f64) {
        self.low_reward_threshold.set(threshold.clamp(0.0, 1.0));
    }
}

/// Per-configuration arm state. Created lazily, reset-only.
#[derive(Clone, Debug, Default)]
pub struct BanditRecord {
    /// Times this arm was chosen by the explore branch.
    pub explore_count: u64,
    /// Times this arm was chosen by the exploit branch.
    pub exploit_count: u64,
    /// Sum of clamped rewards.
    pub reward_sum: f64,
    /// Number of rewards recorded.
    pub samples: u64,
    /// Selection index this arm is excluded until (safety filter).
    pub excluded_until: u64,
    /// Last update time.
    pub updated_at: Option<DateTime<Utc>>,
    recent: [f64; RECENT_WINDOW],
    recent_len: usize,
    recent_idx: usize,
}

impl BanditRecord {
    /// Observed mean reward, or `prior` while under-sampled.
    fn mean(&self, min_samples: u64, prior: f64) -> f64 {
        if self.samples < min_samples {
            prior
        } else {
            self.reward_sum / self.samples as f64
        }
    }

    fn push_recent(&mut self, reward: f64) {
        self.recent[self.recent_idx] = reward;
        self.recent_idx = (self.recent_idx + 1) % RECENT_WINDOW;
        self.recent_len = (self.recent_len + 1).min(RECENT_WINDOW);
    }

    fn recent_all_below(&self, threshold: f64) -> bool {
        self.recent_len == RECENT_WINDOW
            && self.recent[..].iter().all(|r| *r < threshold)
    }

    fn reset_recent(&mut self) {
        self.recent = [0.0; RECENT_WINDOW];
        self.recent_len = 0;
        self.recent_idx = 0;
    }
}

/// Arm table plus the selection counter for one context key.
#[derive(Debug, Default)]
struct ContextArms {
    records: HashMap<String, BanditRecord>,
    selections: u64,
}

/// Which branch produced a choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Uniform random pick.
    Explore,
    /// Highest-mean pick.
    Exploit,
    /// Adaptive selection is switched off; deterministic lowest-id pick.
    Disabled,
}

impl Policy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Exploit => "exploit",
            Self::Disabled => "disabled",
        }
    }
}

/// One selection outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct Choice {
    /// The chosen configuration id.
    pub config_id: String,
    /// Probability this policy had of producing this choice.
    pub propensity: f64,
    /// Branch that produced it.
    pub policy: Policy,
}

/// ε-greedy selector over per-context arms.
///
/// Per-context synchronization only: concurrent selections for different
/// contexts never contend.
#[derive(Debug)]
pub struct Selector {
    arms: DashMap<String, ContextArms>,
    tunables: Tunables,
}

impl Selector {
    /// Build a selector from engine settings.
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            arms: DashMap::new(),
            tunables: Tunables::from_settings(settings),
        }
    }

    /// Runtime-tunable knobs.
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Pick one of `eligible` for `context`. Returns `None` only when
    /// `eligible` is empty.
    ///
    /// The RNG is injected so callers can seed for reproducibility.
    pub fn select<R: Rng>(
        &self,
        context: &str,
        eligible: &[String],
        rng: &mut R,
    ) -> Option<Choice> {
        if eligible.is_empty() {
            return None;
        }
        let started = Instant::now();

        if !self.tunables.enabled() {
            let config_id = eligible.iter().min()?.clone();
            counter!("stencil_selections_total", "policy" => "disabled", "context" => context.to_string())
                .increment(1);
            return Some(Choice {
                config_id,
                propensity: 1.0,
                policy: Policy::Disabled,
            });
        }

        let epsilon = self.tunables.epsilon.get();
        let prior = self.tunables.optimistic_prior.get();
        let min_samples = self.tunables.min_samples.load(Ordering::Relaxed);

        let mut arms = self.arms.entry(context.to_string()).or_default();
        arms.selections += 1;
        let now = arms.selections;

        // Safety filter, falling back to the unfiltered set when it empties.
        let mut usable: Vec<&String> = eligible
            .iter()
            .filter(|id| {
                arms.records
                    .get(id.as_str())
                    .is_none_or(|r| r.excluded_until < now)
            })
            .collect();
        if usable.is_empty() {
            usable = eligible.iter().collect();
        }
        let n = usable.len();

        let best = usable
            .iter()
            .map(|id| {
                let mean = arms
                    .records
                    .get(id.as_str())
                    .map_or(prior, |r| r.mean(min_samples, prior));
                (*id, mean)
            })
            // Tie-break among equal means: lowest config id.
            .max_by(|(a_id, a_mean), (b_id, b_mean)| {
                a_mean
                    .partial_cmp(b_mean)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| id.clone())?;

        let explored = rng.random::<f64>() < epsilon;
        let (config_id, policy) = if explored {
            let pick = usable[rng.random_range(0..n)].clone();
            (pick, Policy::Explore)
        } else {
            (best.clone(), Policy::Exploit)
        };

        let uniform_share = epsilon / n as f64;
        let propensity = if config_id == best {
            (1.0 - epsilon) + uniform_share
        } else {
            uniform_share
        };

        let record = arms.records.entry(config_id.clone()).or_default();
        match policy {
            Policy::Explore => record.explore_count += 1,
            Policy::Exploit => record.exploit_count += 1,
            Policy::Disabled => {}
        }

        counter!("stencil_selections_total", "policy" => policy.as_str(), "context" => context.to_string())
            .increment(1);
        histogram!("stencil_select_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(context, config = %config_id, policy = policy.as_str(), propensity, "selected");
        Some(Choice {
            config_id,
            propensity,
            policy,
        })
    }

    /// Record an observed reward for a configuration under a context.
    ///
    /// Rewards clamp to `[0, 1]`. When the last three rewards all fall below
    /// the threshold, the arm is excluded for the next `exclusion_window`
    /// selections and its window resets so it gets a fresh chance afterward.
    pub fn record_feedback(&self, context: &str, config_id: &str, reward: f64) {
        let started = Instant::now();
        let reward = reward.clamp(0.0, 1.0);
        let threshold = self.tunables.low_reward_threshold.get();
        let window = self.tunables.exclusion_window.load(Ordering::Relaxed);

        let mut arms = self.arms.entry(context.to_string()).or_default();
        let now = arms.selections;
        let record = arms.records.entry(config_id.to_string()).or_default();
        record.samples += 1;
        record.reward_sum += reward;
        record.push_recent(reward);
        record.updated_at = Some(Utc::now());

        if record.recent_all_below(threshold) {
            record.excluded_until = now + window;
            record.reset_recent();
            debug!(
                context,
                config = config_id,
                until = record.excluded_until,
                "arm excluded by safety filter"
            );
        }
        counter!("stencil_feedback_total", "context" => context.to_string()).increment(1);
        histogram!("stencil_feedback_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Snapshot of one arm's record, for diagnostics.
    pub fn record(&self, context: &str, config_id: &str) -> Option<BanditRecord> {
        self.arms
            .get(context)
            .and_then(|arms| arms.records.get(config_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(epsilon: f64) -> EngineSettings {
        EngineSettings {
            epsilon,
            min_samples: 3,
            optimistic_prior: 0.6,
            low_reward_threshold: 0.2,
            exclusion_window: 10,
            ..EngineSettings::default()
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_eligible_returns_none() {
        let selector = Selector::new(&settings(0.1));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(selector.select("ctx", &[], &mut rng).is_none());
    }

    #[test]
    fn zero_epsilon_always_exploits_the_best_arm() {
        let selector = Selector::new(&settings(0.0));
        let eligible = ids(&["x", "y"]);
        for _ in 0..3 {
            selector.record_feedback("ctx", "x", 0.9);
            selector.record_feedback("ctx", "y", 0.4);
        }
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let choice = selector.select("ctx", &eligible, &mut rng).expect("choice");
            assert_eq!(choice.config_id, "x");
            assert_eq!(choice.policy, Policy::Exploit);
            assert!((choice.propensity - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn cold_start_uses_optimistic_prior() {
        let selector = Selector::new(&settings(0.0));
        // "seen" has converged below the prior; "fresh" has no samples.
        for _ in 0..5 {
            selector.record_feedback("ctx", "seen", 0.5);
        }
        let mut rng = StdRng::seed_from_u64(3);
        let choice = selector
            .select("ctx", &ids(&["seen", "fresh"]), &mut rng)
            .expect("choice");
        assert_eq!(choice.config_id, "fresh");
    }

    #[test]
    fn equal_means_tie_break_to_lowest_id() {
        let selector = Selector::new(&settings(0.0));
        let mut rng = StdRng::seed_from_u64(11);
        let choice = selector
            .select("ctx", &ids(&["beta", "alpha", "gamma"]), &mut rng)
            .expect("choice");
        assert_eq!(choice.config_id, "alpha");
    }

    #[test]
    fn exploration_rate_approximates_epsilon() {
        let selector = Selector::new(&settings(0.3));
        let eligible = ids(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut explored = 0u32;
        let trials = 5_000;
        for _ in 0..trials {
            let choice = selector.select("ctx", &eligible, &mut rng).expect("choice");
            if choice.policy == Policy::Explore {
                explored += 1;
            }
        }
        let rate = f64::from(explored) / f64::from(trials);
        assert!((rate - 0.3).abs() < 0.03, "rate {rate} too far from 0.3");
    }

    #[test]
    fn propensity_reflects_the_branch() {
        let selector = Selector::new(&settings(0.4));
        let eligible = ids(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let choice = selector.select("ctx", &eligible, &mut rng).expect("choice");
            let uniform_share = 0.4 / 2.0;
            if choice.config_id == "a" {
                // "a" is the tie-break best.
                assert!((choice.propensity - (0.6 + uniform_share)).abs() < 1e-9);
            } else {
                assert!((choice.propensity - uniform_share).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn three_low_rewards_exclude_the_arm_for_the_window() {
        let selector = Selector::new(&settings(0.0));
        let eligible = ids(&["bad", "good"]);
        let mut rng = StdRng::seed_from_u64(9);

        // "bad" keeps the higher mean (0.525 vs 0.5) even after the slump.
        for _ in 0..3 {
            selector.record_feedback("ctx", "bad", 1.0);
            selector.record_feedback("ctx", "good", 0.5);
        }
        for _ in 0..3 {
            selector.record_feedback("ctx", "bad", 0.05);
        }

        let record = selector.record("ctx", "bad").expect("record");
        assert!(record.excluded_until > 0);

        // Excluded arms lose even with the higher historical mean.
        for _ in 0..10 {
            let choice = selector.select("ctx", &eligible, &mut rng).expect("choice");
            assert_eq!(choice.config_id, "good");
        }
        // Window passed; the arm competes again with its higher mean.
        let choice = selector.select("ctx", &eligible, &mut rng).expect("choice");
        assert_eq!(choice.config_id, "bad");
    }

    #[test]
    fn all_arms_excluded_falls_back_to_unfiltered() {
        let selector = Selector::new(&settings(0.0));
        for _ in 0..3 {
            selector.record_feedback("ctx", "only", 0.0);
        }
        let mut rng = StdRng::seed_from_u64(2);
        let choice = selector
            .select("ctx", &ids(&["only"]), &mut rng)
            .expect("falls back");
        assert_eq!(choice.config_id, "only");
    }

    #[test]
    fn rewards_clamp_to_unit_interval() {
        let selector = Selector::new(&settings(0.0));
        selector.record_feedback("ctx", "a", 7.5);
        selector.record_feedback("ctx", "a", -3.0);
        let record = selector.record("ctx", "a").expect("record");
        assert_eq!(record.samples, 2);
        assert!((record.reward_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn contexts_are_independent() {
        let selector = Selector::new(&settings(0.0));
        for _ in 0..3 {
            selector.record_feedback("chatgpt:coding", "a", 0.9);
        }
        assert!(selector.record("claude:law", "a").is_none());
        assert!(selector.record("chatgpt:coding", "a").is_some());
    }

    #[test]
    fn disabled_selection_is_deterministic_lowest_id() {
        let selector = Selector::new(&EngineSettings {
            selection_enabled: false,
            ..settings(0.5)
        });
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..10 {
            let choice = selector
                .select("ctx", &ids(&["zeta", "alpha"]), &mut rng)
                .expect("choice");
            assert_eq!(choice.config_id, "alpha");
            assert_eq!(choice.policy, Policy::Disabled);
            assert!((choice.propensity - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn epsilon_is_tunable_at_runtime() {
        let selector = Selector::new(&settings(1.0));
        selector.tunables().set_epsilon(0.0);
        assert!((selector.tunables().epsilon() - 0.0).abs() < 1e-9);
        let mut rng = StdRng::seed_from_u64(4);
        let choice = selector
            .select("ctx", &ids(&["a", "b"]), &mut rng)
            .expect("choice");
        assert_eq!(choice.policy, Policy::Exploit);
    }
}
