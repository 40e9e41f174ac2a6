//! Structural and semantic pack validation.
//!
//! Structural problems (empty id, out-of-range priority) make a pack
//! unusable; semantic problems (unknown names, temperature ceilings above the
//! category cap) are warnings that keep the pack usable unless strict mode
//! excludes it. Exclusion drops the pack from the usable set while its
//! diagnostics remain visible.

use serde_json::Value;

use stencil_core::constants::{
    is_critical_category, temperature_cap, BUILTIN_OPERATORS, KNOWN_ASSISTANTS, KNOWN_CATEGORIES,
};

use crate::types::{Diagnostic, DiagnosticKind, Pack, Severity};

/// Priority outside this band is almost certainly a typo.
const PRIORITY_BAND: std::ops::RangeInclusive<i32> = -1_000..=1_000;

/// Scope of strict-mode exclusion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrictMode {
    /// Semantic warnings never exclude a pack.
    Off,
    /// Any semantic warning excludes the pack.
    All,
    /// Semantic warnings exclude the pack only when its matcher covers a
    /// critical category.
    #[default]
    CriticalOnly,
}

/// Validator knobs.
#[derive(Clone, Debug, Default)]
pub struct ValidatorConfig {
    /// Strict-mode exclusion scope.
    pub strict: StrictMode,
}

/// Run all structural and semantic checks against a parsed pack.
pub fn validate(pack: &Pack, _config: &ValidatorConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_structure(pack, &mut diagnostics);
    check_matcher_names(pack, &mut diagnostics);
    check_operator_names(pack, &mut diagnostics);
    check_temperature(pack, &mut diagnostics);
    diagnostics
}

/// Whether strict mode drops a pack given its diagnostics.
///
/// Only semantic warnings count; structural errors already make the pack
/// unusable regardless of mode.
pub fn strict_excludes(pack: &Pack, diagnostics: &[Diagnostic], mode: StrictMode) -> bool {
    let has_semantic_warning = diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::Semantic && d.severity == Severity::Warning);
    if !has_semantic_warning {
        return false;
    }
    match mode {
        StrictMode::Off => false,
        StrictMode::All => true,
        StrictMode::CriticalOnly => covers_critical_category(pack),
    }
}

/// An empty category list matches everything, critical categories included.
fn covers_critical_category(pack: &Pack) -> bool {
    if pack.matcher.category.is_empty() {
        return true;
    }
    pack.matcher.category.iter().any(|pattern| {
        pattern.contains('*')
            || is_critical_category(pattern)
            || stencil_core::constants::CRITICAL_CATEGORIES
                .iter()
                .any(|c| c.contains(pattern.as_str()))
    })
}

fn check_structure(pack: &Pack, diagnostics: &mut Vec<Diagnostic>) {
    if pack.id.trim().is_empty() {
        diagnostics.push(Diagnostic::error(
            &pack.source,
            DiagnosticKind::Schema,
            "pack id must be non-empty",
        ));
    }
    if !PRIORITY_BAND.contains(&pack.priority) {
        diagnostics.push(Diagnostic::warning(
            &pack.source,
            DiagnosticKind::Schema,
            format!(
                "priority {} outside expected range {}..={}",
                pack.priority,
                PRIORITY_BAND.start(),
                PRIORITY_BAND.end()
            ),
        ));
    }
    if !pack.directives.is_null() && !pack.directives.is_object() {
        diagnostics.push(Diagnostic::error(
            &pack.source,
            DiagnosticKind::Schema,
            "directives must be an object",
        ));
    }
}

/// Flag exact matcher names outside the known vocabulary. Wildcard and
/// substring patterns are intentionally unchecked.
fn check_matcher_names(pack: &Pack, diagnostics: &mut Vec<Diagnostic>) {
    for name in &pack.matcher.model {
        if !name.contains('*') && !KNOWN_ASSISTANTS.contains(&name.as_str()) {
            diagnostics.push(Diagnostic::warning(
                &pack.source,
                DiagnosticKind::Semantic,
                format!("unknown assistant '{name}' in matcher"),
            ));
        }
    }
    for name in &pack.matcher.category {
        if !name.contains('*') && !KNOWN_CATEGORIES.contains(&name.as_str()) {
            diagnostics.push(Diagnostic::warning(
                &pack.source,
                DiagnosticKind::Semantic,
                format!("unknown category '{name}' in matcher"),
            ));
        }
    }
}

/// Flag operator names no registry entry will ever match.
fn check_operator_names(pack: &Pack, diagnostics: &mut Vec<Diagnostic>) {
    let ops = &pack.operators;
    let listed = ops
        .baseline
        .iter()
        .chain(&ops.include)
        .chain(&ops.exclude)
        .chain(ops.insert_at.keys());
    for name in listed {
        if !BUILTIN_OPERATORS.contains(&name.as_str()) {
            diagnostics.push(Diagnostic::warning(
                &pack.source,
                DiagnosticKind::Semantic,
                format!("unknown operator '{name}' in directives"),
            ));
        }
    }
    // Anchor targets in `before:OP` / `after:OP` specs.
    for spec in ops.insert_at.values() {
        let Some(spec) = spec.as_str() else { continue };
        let target = spec
            .strip_prefix("before:")
            .or_else(|| spec.strip_prefix("after:"));
        if let Some(target) = target {
            if !BUILTIN_OPERATORS.contains(&target) {
                diagnostics.push(Diagnostic::warning(
                    &pack.source,
                    DiagnosticKind::Semantic,
                    format!("unknown anchor operator '{target}' in insert_at"),
                ));
            }
        }
    }
}

/// A pack may not raise `max_temperature` above the cap of any category it
/// matches. An unscoped pack is checked against the tightest cap.
fn check_temperature(pack: &Pack, diagnostics: &mut Vec<Diagnostic>) {
    let Some(requested) = pack
        .directives
        .get("max_temperature")
        .and_then(Value::as_f64)
    else {
        return;
    };

    let categories: Vec<&str> = if pack.matcher.category.is_empty() {
        KNOWN_CATEGORIES.to_vec()
    } else {
        pack.matcher
            .category
            .iter()
            .map(String::as_str)
            .filter(|c| !c.contains('*'))
            .collect()
    };

    for category in categories {
        if let Some(cap) = temperature_cap(category) {
            if requested > cap {
                diagnostics.push(Diagnostic::warning(
                    &pack.source,
                    DiagnosticKind::Semantic,
                    format!(
                        "max_temperature {requested} exceeds cap {cap} for category '{category}'"
                    ),
                ));
            }
        }
    }
}
