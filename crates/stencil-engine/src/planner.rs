//! Operator plan construction.
//!
//! A plan starts from the baseline, appends includes (dedup, first-seen),
//! removes excludes, then applies insert-at directives in lexicographic order
//! of the target operator name. A directive whose anchor cannot be resolved
//! (unknown anchor operator, out-of-range index, malformed spec) is a no-op:
//! the plan degrades and the skip is recorded as a note, never an error.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

/// A degradation recorded while planning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanNote {
    /// An insert-at directive could not be applied and was skipped.
    PlanDegraded {
        /// Operator the directive targeted.
        operator: String,
        /// Why the directive was skipped.
        reason: String,
    },
}

impl std::fmt::Display for PlanNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlanDegraded { operator, reason } => {
                write!(f, "plan degraded: '{operator}' directive skipped ({reason})")
            }
        }
    }
}

/// Position an insert-at spec resolves to.
enum Anchor {
    Start,
    End,
    Before(String),
    After(String),
    Index(usize),
}

/// Build an operator plan from directives.
///
/// Re-running the planner on its own output with empty directives returns
/// the same plan (fixed point).
pub fn plan(
    baseline: &[String],
    include: &[String],
    exclude: &[String],
    insert_at: &BTreeMap<String, Value>,
) -> (Vec<String>, Vec<PlanNote>) {
    let mut plan: Vec<String> = Vec::with_capacity(baseline.len() + include.len());
    for op in baseline.iter().chain(include) {
        if !plan.contains(op) {
            plan.push(op.clone());
        }
    }
    plan.retain(|op| !exclude.contains(op));

    let mut notes = Vec::new();
    // BTreeMap iteration gives lexicographic order, the documented tie order
    // for repositioning.
    for (op, spec) in insert_at {
        if exclude.contains(op) {
            continue;
        }
        if let Err(reason) = apply_insert(&mut plan, op, spec) {
            warn!(operator = %op, %reason, "insert_at directive skipped");
            notes.push(PlanNote::PlanDegraded {
                operator: op.clone(),
                reason,
            });
        }
    }

    dedup_in_place(&mut plan);
    (plan, notes)
}

/// Apply one insert-at directive, or explain why it is a no-op.
fn apply_insert(plan: &mut Vec<String>, op: &str, spec: &Value) -> Result<(), String> {
    let anchor = parse_anchor(spec)?;

    // Resolve against the plan with the operator removed, so `before:X`
    // means "immediately before X" regardless of where `op` currently sits.
    let mut without: Vec<String> = plan.iter().filter(|o| o.as_str() != op).cloned().collect();
    let position = match anchor {
        Anchor::Start => 0,
        Anchor::End => without.len(),
        Anchor::Before(target) => without
            .iter()
            .position(|o| *o == target)
            .ok_or_else(|| format!("anchor operator '{target}' not in plan"))?,
        Anchor::After(target) => {
            without
                .iter()
                .position(|o| *o == target)
                .ok_or_else(|| format!("anchor operator '{target}' not in plan"))?
                + 1
        }
        Anchor::Index(i) => {
            if i > without.len() {
                return Err(format!("index {i} out of range for plan of {}", without.len()));
            }
            i
        }
    };

    without.insert(position, op.to_string());
    *plan = without;
    Ok(())
}

fn parse_anchor(spec: &Value) -> Result<Anchor, String> {
    if let Some(i) = spec.as_u64() {
        return Ok(Anchor::Index(i as usize));
    }
    let Some(s) = spec.as_str() else {
        return Err(format!("malformed insert_at spec: {spec}"));
    };
    match s {
        "start" => Ok(Anchor::Start),
        "end" => Ok(Anchor::End),
        _ => {
            if let Some(target) = s.strip_prefix("before:") {
                Ok(Anchor::Before(target.to_string()))
            } else if let Some(target) = s.strip_prefix("after:") {
                Ok(Anchor::After(target.to_string()))
            } else if let Ok(i) = s.parse::<usize>() {
                Ok(Anchor::Index(i))
            } else {
                Err(format!("malformed insert_at spec: '{s}'"))
            }
        }
    }
}

fn dedup_in_place(plan: &mut Vec<String>) {
    let mut seen: Vec<String> = Vec::with_capacity(plan.len());
    plan.retain(|op| {
        if seen.contains(op) {
            false
        } else {
            seen.push(op.clone());
            true
        }
    });
}
