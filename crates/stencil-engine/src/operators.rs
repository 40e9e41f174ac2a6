//! Operator registry and the built-in transform steps.
//!
//! Operators are pure `fn(Document) -> Document` steps keyed by name. Running
//! a plan is a left fold over the document; the same plan and input always
//! produce the same output. An unknown name in a plan is skipped with a
//! warning in the signals, never a hard failure.

use std::collections::HashMap;

use tracing::warn;

use stencil_core::constants::BUILTIN_OPERATORS;
use stencil_core::{Document, Example};

/// A single transform step.
pub type OperatorFn = fn(Document) -> Document;

/// Signals produced while running a plan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformSignals {
    /// Operator names that ran, in order.
    pub applied: Vec<String>,
    /// Human-readable warnings (unknown operator names, for now).
    pub warnings: Vec<String>,
}

/// Name-to-operator lookup table.
pub struct OperatorRegistry {
    operators: HashMap<String, OperatorFn>,
}

impl Default for OperatorRegistry {
    /// Registry preloaded with the built-in operators.
    fn default() -> Self {
        let mut registry = Self {
            operators: HashMap::new(),
        };
        registry.register("role_hdr", role_hdr);
        registry.register("constraints", constraints);
        registry.register("io_format", io_format);
        registry.register("examples", examples);
        registry.register("quality_bar", quality_bar);
        debug_assert!(BUILTIN_OPERATORS
            .iter()
            .all(|op| registry.operators.contains_key(*op)));
        registry
    }
}

impl OperatorRegistry {
    /// Register (or replace) an operator under a name.
    pub fn register(&mut self, name: impl Into<String>, op: OperatorFn) {
        let _ = self.operators.insert(name.into(), op);
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Run a plan over a document.
    pub fn run_plan(&self, mut doc: Document, plan: &[String]) -> (Document, TransformSignals) {
        let mut signals = TransformSignals::default();
        for name in plan {
            match self.operators.get(name) {
                Some(op) => {
                    doc = op(doc);
                    signals.applied.push(name.clone());
                }
                None => {
                    warn!(operator = %name, "unknown operator in plan, skipping");
                    signals
                        .warnings
                        .push(format!("unknown operator '{name}' skipped"));
                }
            }
        }
        (doc, signals)
    }
}

// ─── Built-in operators ─────────────────────────────────────────────────────

/// Prefix the goal with a `[Role: …]` header exactly once.
fn role_hdr(mut doc: Document) -> Document {
    let role = doc
        .category
        .as_deref()
        .filter(|c| !c.is_empty())
        .map_or_else(|| "general".to_string(), str::to_string);
    let goal = doc.sections.goal.take().unwrap_or_default();
    doc.sections.goal = if goal.starts_with("[Role:") {
        Some(goal)
    } else {
        Some(format!("[Role: {role} specialist]\n{goal}"))
    };
    doc
}

/// Trim constraint lines and dedup them in first-seen order.
fn constraints(mut doc: Document) -> Document {
    let mut cleaned: Vec<String> = Vec::with_capacity(doc.sections.constraints.len());
    for line in &doc.sections.constraints {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !cleaned.iter().any(|c| c == trimmed) {
            cleaned.push(trimmed.to_string());
        }
    }
    doc.sections.constraints = cleaned;
    doc
}

/// Default the output format to Markdown when absent.
fn io_format(mut doc: Document) -> Document {
    let missing = doc
        .sections
        .output_format
        .as_deref()
        .is_none_or(|f| f.trim().is_empty());
    if missing {
        doc.sections.output_format = Some("Markdown".to_string());
        doc.meta
            .assumptions
            .push("output format defaulted to Markdown".to_string());
    }
    doc
}

/// Inject one deterministic placeholder example when none exist.
fn examples(mut doc: Document) -> Document {
    if doc.sections.examples.is_empty() {
        doc.sections.examples.push(Example {
            input: "A representative input for this task".to_string(),
            output: "The ideal response for that input".to_string(),
        });
        doc.meta
            .assumptions
            .push("placeholder example injected".to_string());
    }
    doc
}

/// Compute quality signals and the composite score.
fn quality_bar(mut doc: Document) -> Document {
    let constraint_count = doc.sections.constraints.len();
    let has_io = doc.sections.output_format.is_some();
    let has_examples = !doc.sections.examples.is_empty();
    let has_goal = doc
        .sections
        .goal
        .as_deref()
        .is_some_and(|g| !g.trim().is_empty());

    let score = 0.4
        + if has_io { 0.2 } else { 0.0 }
        + if has_examples { 0.2 } else { 0.0 }
        + 0.05 * constraint_count as f64;

    let quality = &mut doc.meta.quality;
    quality.score = Some(score.min(1.0));
    let _ = quality
        .signals
        .insert("constraints_count".to_string(), constraint_count.into());
    let _ = quality
        .signals
        .insert("has_output_format".to_string(), has_io.into());
    let _ = quality
        .signals
        .insert("has_examples".to_string(), has_examples.into());
    let _ = quality.signals.insert("has_goal".to_string(), has_goal.into());
    doc
}
