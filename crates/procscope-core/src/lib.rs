//! Core domain types and the suspicion rule engine for procscope.
//!
//! This crate is deliberately free of I/O except for the audit log writer:
//! the process record model, the classifier, configuration parsing, and host
//! facts all live here so the sensor and daemon crates can share them.

pub mod audit;
pub mod classify;
pub mod config;
pub mod host;
pub mod process;
pub mod signature;

pub use classify::{classify, ClassifyInput, Verdict};
pub use process::{ConnectionSummary, ProcessRecord, SuspicionLevel};
pub use signature::{Signature, TrustLevel};
