//! Shared types and pure building blocks for the coverage harness.
//!
//! The worker binary and the operator CLI both depend on this crate so the
//! record format, the problem folder layout and the candidate normalization
//! rules never drift between them.

pub mod config;
pub mod error;
pub mod fixtures;
pub mod normalize;
pub mod report;
pub mod types;

pub use error::{ErrorKind, HarnessError};
