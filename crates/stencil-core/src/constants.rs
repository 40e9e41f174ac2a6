//! Domain vocabulary shared across the engine.

/// Assistant names the validator recognises.
pub const KNOWN_ASSISTANTS: &[&str] = &["chatgpt", "claude", "gemini", "deepseek"];

/// Category names the validator recognises.
pub const KNOWN_CATEGORIES: &[&str] = &["coding", "science", "psychology", "law", "politics"];

/// Categories subject to strict-mode exclusion under `CriticalOnly` scope.
pub const CRITICAL_CATEGORIES: &[&str] = &["law", "medical"];

/// Per-category ceiling for `max_temperature` directives.
///
/// A pack that raises the ceiling above these values gets a semantic
/// warning (and is excluded under strict mode for critical categories).
pub const CATEGORY_TEMPERATURE_CAPS: &[(&str, f64)] = &[
    ("law", 0.3),
    ("medical", 0.3),
    ("psychology", 0.35),
    ("politics", 0.35),
    ("science", 0.4),
    ("coding", 0.4),
];

/// Operator names the engine ships with, in default baseline order.
pub const BUILTIN_OPERATORS: &[&str] =
    &["role_hdr", "constraints", "io_format", "examples", "quality_bar"];

/// Look up the temperature cap for a category, if one is defined.
pub fn temperature_cap(category: &str) -> Option<f64> {
    CATEGORY_TEMPERATURE_CAPS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, cap)| *cap)
}

/// Whether a category is treated as critical for strict-mode exclusion.
pub fn is_critical_category(category: &str) -> bool {
    CRITICAL_CATEGORIES.contains(&category)
}
