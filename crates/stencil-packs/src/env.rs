//! Environment variable substitution for pack values.
//!
//! String leaves may contain `${ENV:VAR}` or `${ENV:VAR:-default}` tokens.
//! Substitution is governed by an allow/deny policy resolved at substitution
//! time: a variable outside the allowlist (or matching the denylist) produces
//! a `security` validation error rather than a silent substitution. The
//! default, when present, is used in its place; otherwise the token is left
//! verbatim.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::types::{Diagnostic, DiagnosticKind};

static ENV_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{ENV:([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap());

/// Allow/deny policy for env substitution.
///
/// Entries match by exact name or prefix. An empty allowlist permits every
/// variable not denied.
#[derive(Clone, Debug, Default)]
pub struct EnvPolicy {
    /// Permitted variable names/prefixes. Empty = allow all.
    pub allowlist: Vec<String>,
    /// Blocked variable names/prefixes. Checked before the allowlist.
    pub denylist: Vec<String>,
}

impl EnvPolicy {
    /// Whether the policy permits substituting `var`.
    pub fn permits(&self, var: &str) -> bool {
        let denied = self
            .denylist
            .iter()
            .any(|p| var == p || var.starts_with(p.as_str()));
        if denied {
            return false;
        }
        self.allowlist.is_empty()
            || self
                .allowlist
                .iter()
                .any(|p| var == p || var.starts_with(p.as_str()))
    }
}

/// Walk a JSON value and substitute env tokens in every string leaf,
/// reading from the process environment.
///
/// Policy violations are appended to `diagnostics` as `security` errors.
pub fn substitute(
    value: &mut Value,
    policy: &EnvPolicy,
    path: &Path,
    diagnostics: &mut Vec<Diagnostic>,
) {
    substitute_with(value, policy, path, diagnostics, &|var| {
        std::env::var(var).ok()
    });
}

/// Substitution with an injected variable lookup (testable without touching
/// the process environment).
pub fn substitute_with(
    value: &mut Value,
    policy: &EnvPolicy,
    path: &Path,
    diagnostics: &mut Vec<Diagnostic>,
    lookup: &dyn Fn(&str) -> Option<String>,
) {
    match value {
        Value::String(s) => {
            if s.contains("${ENV:") {
                *s = substitute_str(s, policy, path, diagnostics, lookup);
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_with(item, policy, path, diagnostics, lookup);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_with(v, policy, path, diagnostics, lookup);
            }
        }
        _ => {}
    }
}

fn substitute_str(
    input: &str,
    policy: &EnvPolicy,
    path: &Path,
    diagnostics: &mut Vec<Diagnostic>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> String {
    ENV_PATTERN
        .replace_all(input, |caps: &Captures<'_>| {
            let var = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            if !policy.permits(var) {
                diagnostics.push(Diagnostic::error(
                    path,
                    DiagnosticKind::Security,
                    format!("env var '{var}' blocked by policy"),
                ));
                return default.map_or_else(|| caps[0].to_string(), str::to_string);
            }

            match lookup(var) {
                Some(val) => val,
                None => default.map_or_else(|| caps[0].to_string(), str::to_string),
            }
        })
        .into_owned()
}
