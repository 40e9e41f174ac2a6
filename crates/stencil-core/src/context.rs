//! Context keys.
//!
//! A [`ContextKey`] identifies the (model, category) pair a request is served
//! under. Packs match against it, and the adaptive selector keeps one arm set
//! per key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The (model, category) pair used for pack applicability and selector state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    /// Target model/assistant name (e.g. `chatgpt`).
    pub model: String,
    /// Domain category (e.g. `coding`).
    pub category: String,
}

impl ContextKey {
    /// Build a key from owned or borrowed parts.
    pub fn new(model: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.category)
    }
}
