//! # stencil-engine
//!
//! The deterministic heart of Stencil: pack resolution (ordered merge),
//! operator planning, and the transform engine that runs a plan over a
//! document.
//!
//! Everything here is pure with respect to its inputs: the same packs,
//! context, overrides, and document always produce the same resolution, plan,
//! and output document. Degradation (dangling anchors, unknown operator
//! names) is recorded as notes and signals, never surfaced as errors.
//!
//! ## Module Overview
//!
//! - [`resolver`] — matching-pack selection and the directive merge fold
//! - [`planner`] — baseline/include/exclude/insert-at plan construction
//! - [`operators`] — the operator registry and the built-in transform steps
//!
//! ## Crate Position
//!
//! Depends on: stencil-core, stencil-packs.
//! Depended on by: stencil-runtime.

#![deny(unsafe_code)]

pub mod operators;
pub mod planner;
pub mod resolver;

pub use operators::{OperatorRegistry, TransformSignals};
pub use planner::{plan, PlanNote};
pub use resolver::{resolve, Resolution};
