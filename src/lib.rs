//! regdoc: regulatory document classification.
//!
//! A `PatternRegistry` loaded from YAML rule files drives pluggable
//! classifier backends. The pipeline screens inbound messages through a
//! `SecurityGate` before extracting, classifying and persisting them.

pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod security;

pub use error::{Error, Result};
