//! hostfacts common types and errors.
//!
//! This crate provides foundational types shared across the hostfacts crates:
//! - Module identifiers
//! - The unified error taxonomy
//! - Report schema versioning

pub mod error;
pub mod id;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::ModuleId;

/// Schema version of the unified report document.
pub const SCHEMA_VERSION: &str = "1.0.0";
