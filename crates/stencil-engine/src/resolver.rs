//! Pack selection and the directive merge fold.
//!
//! Resolution picks the packs whose matchers cover the context key (and whose
//! profile, if any, matches the chosen one), orders them by ascending
//! priority with pack id as the tie-break, and left-folds their directives
//! into a single JSON value. Caller overrides merge last, after every pack.
//!
//! Merge rules per field type:
//!
//! - lists concatenate and dedup in first-seen order, unless the incoming
//!   side is `{"override": true, "value": […]}`, which replaces;
//! - numeric leaves take the more restrictive bound by key name (`max_*`,
//!   `*_limit`, `*_budget`, `*_cap` → min; `min_*`, `*_count`, `*_depth`,
//!   `*_floor` → max; otherwise last writer);
//! - objects merge recursively; everything else is last-writer.

use serde_json::{Map, Value};
use tracing::debug;

use stencil_core::constants::BUILTIN_OPERATORS;
use stencil_core::ContextKey;
use stencil_packs::{OperatorDirectives, Pack};

use crate::planner::{self, PlanNote};

/// Output of one resolution: the merged directives, the accumulated operator
/// directives, and the plan built from them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    /// Ids of the packs that applied, in merge order.
    pub packs_applied: Vec<String>,
    /// Merged directive payload.
    pub directives: Value,
    /// Accumulated operator directives fed to the planner.
    pub operators: OperatorDirectives,
    /// The operator plan.
    pub plan: Vec<String>,
    /// Degradation notes from planning.
    pub notes: Vec<PlanNote>,
}

/// Resolve the context key against a pack set.
///
/// `profile` filters competing configurations: packs carrying a different
/// profile label are skipped; unlabeled packs always apply. `overrides` is
/// request-scope JSON merged after all packs. Identical inputs produce an
/// identical resolution.
pub fn resolve(
    key: &ContextKey,
    packs: &[Pack],
    profile: Option<&str>,
    overrides: Option<&Value>,
) -> Resolution {
    let mut applicable: Vec<&Pack> = packs
        .iter()
        .filter(|p| p.matcher.matches(key))
        .filter(|p| match (&p.profile, profile) {
            (None, _) => true,
            (Some(own), Some(chosen)) => own == chosen,
            (Some(_), None) => false,
        })
        .collect();
    applicable.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    let mut resolution = Resolution {
        directives: Value::Object(Map::new()),
        ..Resolution::default()
    };

    for pack in &applicable {
        resolution.packs_applied.push(pack.id.clone());
        merge_value(&mut resolution.directives, &pack.directives, None);
        accumulate_operators(&mut resolution.operators, &pack.operators);
    }

    if let Some(overrides) = overrides {
        merge_value(&mut resolution.directives, overrides, None);
    }

    let baseline: Vec<String> = if resolution.operators.baseline.is_empty() {
        BUILTIN_OPERATORS.iter().map(|s| (*s).to_string()).collect()
    } else {
        resolution.operators.baseline.clone()
    };
    let (plan, notes) = planner::plan(
        &baseline,
        &resolution.operators.include,
        &resolution.operators.exclude,
        &resolution.operators.insert_at,
    );
    resolution.plan = plan;
    resolution.notes = notes;

    debug!(
        key = %key,
        packs = resolution.packs_applied.len(),
        plan_len = resolution.plan.len(),
        "resolved"
    );
    resolution
}

/// Fold one pack's operator directives into the accumulator.
///
/// The first pack to declare a baseline wins it; include/exclude append with
/// dedup; insert-at is last-writer per operator name, so higher-priority
/// packs reposition over lower ones.
fn accumulate_operators(acc: &mut OperatorDirectives, incoming: &OperatorDirectives) {
    if acc.baseline.is_empty() && !incoming.baseline.is_empty() {
        acc.baseline = incoming.baseline.clone();
    }
    for op in &incoming.include {
        if !acc.include.contains(op) {
            acc.include.push(op.clone());
        }
    }
    for op in &incoming.exclude {
        if !acc.exclude.contains(op) {
            acc.exclude.push(op.clone());
        }
    }
    for (op, spec) in &incoming.insert_at {
        let _ = acc.insert_at.insert(op.clone(), spec.clone());
    }
}

/// Merge `incoming` into `base` under the per-field-type rules. `key` is the
/// name of the field being merged, used for the numeric bound rules.
fn merge_value(base: &mut Value, incoming: &Value, key: Option<&str>) {
    if incoming.is_null() {
        return;
    }
    if let Some(replacement) = override_payload(incoming) {
        *base = replacement.clone();
        return;
    }

    match (&mut *base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (k, v) in incoming_map {
                match base_map.get_mut(k) {
                    Some(existing) => merge_value(existing, v, Some(k)),
                    None => {
                        let _ = base_map.insert(k.clone(), unwrap_override(v));
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(incoming_items)) => {
            for item in incoming_items {
                if !base_items.contains(item) {
                    base_items.push(item.clone());
                }
            }
        }
        (Value::Number(_), Value::Number(_)) => {
            let existing = base.as_f64();
            let candidate = incoming.as_f64();
            if let (Some(existing), Some(candidate)) = (existing, candidate) {
                let keep_existing = match key.map(NumericRule::for_key) {
                    Some(NumericRule::Min) => existing <= candidate,
                    Some(NumericRule::Max) => existing >= candidate,
                    Some(NumericRule::LastWriter) | None => false,
                };
                if !keep_existing {
                    *base = incoming.clone();
                }
            } else {
                *base = incoming.clone();
            }
        }
        _ => *base = incoming.clone(),
    }
}

/// Bound rule a numeric key follows during the merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumericRule {
    Min,
    Max,
    LastWriter,
}

impl NumericRule {
    fn for_key(key: &str) -> Self {
        if key.starts_with("max_")
            || key.ends_with("_limit")
            || key.ends_with("_budget")
            || key.ends_with("_cap")
        {
            Self::Min
        } else if key.starts_with("min_")
            || key.ends_with("_count")
            || key.ends_with("_depth")
            || key.ends_with("_floor")
        {
            Self::Max
        } else {
            Self::LastWriter
        }
    }
}

/// Detect the `{"override": true, "value": …}` replacement wrapper.
fn override_payload(value: &Value) -> Option<&Value> {
    let map = value.as_object()?;
    if map.len() == 2 && map.get("override").and_then(Value::as_bool) == Some(true) {
        map.get("value")
    } else {
        None
    }
}

/// Strip the override wrapper when a field is first introduced.
fn unwrap_override(value: &Value) -> Value {
    override_payload(value).unwrap_or(value).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    use stencil_packs::Matcher;

    fn pack(id: &str, priority: i32, directives: Value) -> Pack {
        Pack {
            id: id.to_string(),
            priority,
            directives,
            source: PathBuf::from(format!("{id}.json")),
            ..Pack::default()
        }
    }

    fn key() -> ContextKey {
        ContextKey::new("chatgpt", "coding")
    }

    #[test]
    fn packs_merge_in_priority_then_id_order() {
        let packs = vec![
            pack("b", 10, json!({"tone": "terse"})),
            pack("a", 10, json!({"tone": "verbose"})),
            pack("z", 5, json!({"tone": "neutral"})),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.packs_applied, ["z", "a", "b"]);
        // Last writer at equal nesting: highest priority, then highest id.
        assert_eq!(r.directives["tone"], "terse");
    }

    #[test]
    fn lists_concat_dedup_first_seen() {
        let packs = vec![
            pack("a", 1, json!({"style": ["terse", "formal"]})),
            pack("b", 2, json!({"style": ["formal", "cited"]})),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.directives["style"], json!(["terse", "formal", "cited"]));
    }

    #[test]
    fn override_wrapper_replaces_list() {
        let packs = vec![
            pack("a", 1, json!({"style": ["terse", "formal"]})),
            pack(
                "b",
                2,
                json!({"style": {"override": true, "value": ["cited"]}}),
            ),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.directives["style"], json!(["cited"]));
    }

    #[test]
    fn numeric_bounds_take_restrictive_side() {
        let packs = vec![
            pack("a", 1, json!({"max_tokens": 4000, "min_examples": 1, "retries": 3})),
            pack("b", 2, json!({"max_tokens": 2000, "min_examples": 2, "retries": 1})),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.directives["max_tokens"], 2000);
        assert_eq!(r.directives["min_examples"], 2);
        // No bound rule: last writer.
        assert_eq!(r.directives["retries"], 1);
    }

    #[test]
    fn restrictive_bound_survives_a_looser_later_pack() {
        let packs = vec![
            pack("a", 1, json!({"max_tokens": 1000, "token_limit": 50})),
            pack("b", 2, json!({"max_tokens": 9000, "token_limit": 500})),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.directives["max_tokens"], 1000);
        assert_eq!(r.directives["token_limit"], 50);
    }

    #[test]
    fn objects_merge_recursively() {
        let packs = vec![
            pack("a", 1, json!({"limits": {"max_depth_budget": 5, "style": ["x"]}})),
            pack("b", 2, json!({"limits": {"style": ["y"], "retries": 2}})),
        ];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.directives["limits"]["style"], json!(["x", "y"]));
        assert_eq!(r.directives["limits"]["retries"], 2);
    }

    #[test]
    fn overrides_merge_after_all_packs() {
        let packs = vec![pack("a", 1, json!({"tone": "terse", "max_tokens": 100}))];
        let overrides = json!({"tone": "playful", "max_tokens": 50});
        let r = resolve(&key(), &packs, None, Some(&overrides));
        assert_eq!(r.directives["tone"], "playful");
        assert_eq!(r.directives["max_tokens"], 50);
    }

    #[test]
    fn non_matching_packs_are_skipped() {
        let mut law = pack("law", 1, json!({"tone": "formal"}));
        law.matcher = Matcher {
            model: Vec::new(),
            category: vec!["law".to_string()],
        };
        let packs = vec![law, pack("base", 0, json!({"tone": "neutral"}))];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.packs_applied, ["base"]);
        assert_eq!(r.directives["tone"], "neutral");
    }

    #[test]
    fn profile_filters_competing_packs() {
        let mut arm_a = pack("arm-a", 1, json!({"tone": "a"}));
        arm_a.profile = Some("fast".to_string());
        let mut arm_b = pack("arm-b", 2, json!({"tone": "b"}));
        arm_b.profile = Some("thorough".to_string());
        let packs = vec![pack("base", 0, json!({"shared": true})), arm_a, arm_b];

        let r = resolve(&key(), &packs, Some("fast"), None);
        assert_eq!(r.packs_applied, ["base", "arm-a"]);
        assert_eq!(r.directives["tone"], "a");

        // No profile chosen: labeled packs are skipped entirely.
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.packs_applied, ["base"]);
    }

    #[test]
    fn first_baseline_wins_and_default_applies_otherwise() {
        let mut with_baseline = pack("b", 2, Value::Null);
        with_baseline.operators.baseline =
            vec!["constraints".to_string(), "quality_bar".to_string()];
        let packs = vec![pack("a", 1, Value::Null), with_baseline];
        let r = resolve(&key(), &packs, None, None);
        assert_eq!(r.plan, ["constraints", "quality_bar"]);

        let r = resolve(&key(), &[pack("a", 1, Value::Null)], None, None);
        assert_eq!(r.plan, BUILTIN_OPERATORS);
    }

    #[test]
    fn resolution_is_deterministic_and_idempotent_under_noop_packs() {
        let packs = vec![
            pack("a", 1, json!({"style": ["terse"], "max_tokens": 100})),
            pack("noop", 2, Value::Null),
        ];
        let first = resolve(&key(), &packs, None, None);
        let second = resolve(&key(), &packs, None, None);
        assert_eq!(first, second);

        let without_noop = resolve(&key(), &packs[..1], None, None);
        assert_eq!(first.directives, without_noop.directives);
        assert_eq!(first.plan, without_noop.plan);
    }

    #[test]
    fn exclude_include_interaction_across_priorities() {
        let mut low = pack("pack-a", 10, Value::Null);
        low.operators.include = vec!["role_hdr".to_string()];
        let mut high = pack("pack-b", 20, Value::Null);
        high.operators.exclude = vec!["role_hdr".to_string()];
        high.operators.include = vec!["quality_bar".to_string()];

        let r = resolve(&key(), &[low, high], None, None);
        assert!(!r.plan.contains(&"role_hdr".to_string()));
        assert_eq!(
            r.plan.iter().filter(|op| *op == "quality_bar").count(),
            1
        );
    }
}
