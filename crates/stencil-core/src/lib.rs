//! # stencil-core
//!
//! Shared foundation for the Stencil prompt-transformation engine.
//!
//! ## Module Overview
//!
//! - [`constants`] — known assistants/categories, critical categories,
//!   per-category temperature ceilings
//! - [`context`] — the (model, category) key used for pack applicability and
//!   selector state
//! - [`document`] — the structured prompt document IR that operators transform
//!
//! ## Crate Position
//!
//! Standalone (no stencil crate dependencies).
//! Depended on by: stencil-packs, stencil-engine, stencil-runtime.

#![deny(unsafe_code)]

pub mod constants;
pub mod context;
pub mod document;

pub use context::ContextKey;
pub use document::{Document, Example, Meta, Quality, Sections};
