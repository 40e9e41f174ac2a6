//! Runtime error types.
//!
//! File-level problems stay inside diagnostics and never reach this enum;
//! only conditions that leave a caller without usable configuration, or that
//! reject an explicit reload, surface as errors.

use thiserror::Error;

/// Errors surfaced by the serving facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No configuration matches the requested context, at any fallback tier.
    #[error("no configuration matches assistant '{assistant}' / category '{category}'")]
    NoConfiguration {
        /// Requested assistant.
        assistant: String,
        /// Requested category.
        category: String,
    },

    /// A reload produced zero valid packs; the prior snapshot was retained.
    #[error("reload rejected: {reason}")]
    ReloadRejected {
        /// Why the reload was rejected.
        reason: String,
    },

    /// The engine has never completed a successful load.
    #[error("engine not loaded")]
    NotLoaded,
}

/// Convenience alias for facade results.
pub type Result<T> = std::result::Result<T, EngineError>;
