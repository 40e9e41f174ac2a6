//! Pack data model and diagnostics.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use stencil_core::ContextKey;

/// Layer a pack belongs to. Higher layers typically carry higher priority,
/// but ordering is decided by the `priority` field alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackKind {
    /// Applies everywhere unless narrowed by its matcher.
    #[default]
    Global,
    /// Scoped to one or more models.
    Model,
    /// Scoped to one or more categories.
    Category,
    /// Organisation-level policy.
    Org,
    /// Project-level policy.
    Project,
    /// User-level preferences.
    User,
}

/// Applicability predicate for a pack.
///
/// Patterns support exact match, `*` wildcards, and substring match. An empty
/// list matches every value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Matcher {
    /// Model patterns (e.g. `chatgpt`, `claude*`).
    #[serde(deserialize_with = "one_or_many")]
    pub model: Vec<String>,
    /// Category patterns.
    #[serde(deserialize_with = "one_or_many")]
    pub category: Vec<String>,
}

impl Matcher {
    /// Whether this matcher applies to the given context key.
    pub fn matches(&self, key: &ContextKey) -> bool {
        self.matches_model(&key.model) && self.matches_category(&key.category)
    }

    /// Model-side match only, used for fallback-tier discovery.
    pub fn matches_model(&self, model: &str) -> bool {
        matches_any(model, &self.model)
    }

    /// Category-side match only, used for fallback-tier discovery.
    pub fn matches_category(&self, category: &str) -> bool {
        matches_any(category, &self.category)
    }
}

/// Match a value against a pattern list. Empty list matches everything.
fn matches_any(value: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|p| pattern_matches(value, p))
}

/// Exact, `*`-wildcard, or substring match.
fn pattern_matches(value: &str, pattern: &str) -> bool {
    if pattern == value {
        return true;
    }
    if pattern.contains('*') {
        return wildcard_matches(value, pattern);
    }
    value.contains(pattern)
}

/// Anchored wildcard match where `*` spans any (possibly empty) substring.
fn wildcard_matches(value: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            // Anchored prefix
            let Some(stripped) = rest.strip_prefix(part) else {
                return false;
            };
            rest = stripped;
        } else if i == parts.len() - 1 {
            // Anchored suffix
            return rest.ends_with(part);
        } else {
            let Some(pos) = rest.find(part) else {
                return false;
            };
            rest = &rest[pos + part.len()..];
        }
    }
    true
}

/// Operator-set directives carried by a pack.
///
/// These are accumulated as distinct lists during resolution and fed to the
/// planner; they are never merged into a single operator list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct OperatorDirectives {
    /// Baseline plan override. The first matching pack (lowest priority,
    /// then id) that declares one wins; the engine default applies otherwise.
    pub baseline: Vec<String>,
    /// Operators to append to the baseline.
    pub include: Vec<String>,
    /// Operators to remove from the plan.
    pub exclude: Vec<String>,
    /// Reposition directives: operator name → `start`, `end`, `before:OP`,
    /// `after:OP`, or a numeric index. Sorted map for deterministic order.
    pub insert_at: BTreeMap<String, Value>,
}

impl OperatorDirectives {
    /// Whether no directive of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
            && self.include.is_empty()
            && self.exclude.is_empty()
            && self.insert_at.is_empty()
    }
}

/// A layered configuration document. Immutable once parsed; a reload builds
/// new packs rather than mutating existing ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pack {
    /// Unique pack id (unique across the whole pack directory).
    pub id: String,
    /// Layer this pack belongs to.
    pub kind: PackKind,
    /// Merge order: lower priority merges first, higher priority wins ties.
    pub priority: i32,
    /// Applicability predicate.
    #[serde(rename = "match")]
    pub matcher: Matcher,
    /// Competing-configuration label. Packs with a profile are bandit arms;
    /// packs without one always apply.
    pub profile: Option<String>,
    /// Free-form directive payload (style lists, numeric limits, booleans).
    pub directives: Value,
    /// Operator include/exclude/insert-at directives.
    pub operators: OperatorDirectives,
    /// Source file, attached after parsing.
    #[serde(skip)]
    pub source: PathBuf,
}

/// Diagnostic classification tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unreadable or malformed document.
    Parse,
    /// Structurally invalid (missing/ill-typed fields, bad enums).
    Schema,
    /// Valid but against domain guidance.
    Semantic,
    /// Blocked by a security policy (env allowlist, size cap).
    Security,
}

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The file (or pack) is unusable.
    Error,
    /// The pack is kept unless strict mode excludes it.
    Warning,
}

/// A single validation or load diagnostic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Source file the diagnostic refers to.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Classification tag.
    pub kind: DiagnosticKind,
    /// Error or warning.
    pub severity: Severity,
    /// 1-based line number, when derivable.
    pub line: Option<usize>,
}

impl Diagnostic {
    /// Build an error diagnostic.
    pub fn error(path: &Path, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
            kind,
            severity: Severity::Error,
            line: None,
        }
    }

    /// Build a warning diagnostic.
    pub fn warning(path: &Path, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
            kind,
            severity: Severity::Warning,
            line: None,
        }
    }

    /// Attach a 1-based line number.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "{}:{line}: {:?}: {}",
                self.path.display(),
                self.kind,
                self.message
            ),
            None => write!(
                f,
                "{}: {:?}: {}",
                self.path.display(),
                self.kind,
                self.message
            ),
        }
    }
}

/// Deserialize either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
