//! # stencil-packs
//!
//! Pack loading: filesystem scan, JSON parsing, environment substitution,
//! and validation.
//!
//! Packs are layered configuration documents (`*.json`) living in a watched
//! directory. A failing file contributes diagnostics but never aborts the
//! load of its siblings; a pack excluded by strict mode keeps its diagnostics
//! visible while being dropped from the usable set.
//!
//! ## Module Overview
//!
//! - [`types`] — [`Pack`], matcher, operator directives, [`Diagnostic`]
//! - [`parser`] — single-file JSON parsing with size cap and line numbers
//! - [`env`] — `${ENV:VAR:-default}` substitution under an allow/deny policy
//! - [`validator`] — structural and semantic checks, strict-mode exclusion
//! - [`store`] — directory scan and the full load pipeline
//!
//! ## Crate Position
//!
//! Depends on: stencil-core.
//! Depended on by: stencil-engine, stencil-runtime.

#![deny(unsafe_code)]

pub mod env;
pub mod parser;
pub mod store;
pub mod types;
pub mod validator;

pub use env::EnvPolicy;
pub use store::{LoadResult, PackStore, StoreConfig};
pub use types::{Diagnostic, DiagnosticKind, Matcher, OperatorDirectives, Pack, PackKind, Severity};
pub use validator::{StrictMode, ValidatorConfig};
