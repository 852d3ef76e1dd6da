//! hostfacts core library
//!
//! Collects host facts through a local structured query engine, with shell
//! fallbacks, and assembles them into one report:
//! - subprocess runner and interactive engine sessions
//! - query client with extension-table routing
//! - probe fallback executor
//! - collection modules and the orchestrator
//!
//! The binary entry point is in `main.rs`.

pub mod collect;
pub mod exit_codes;
pub mod identity;
pub mod logging;
pub mod modules;
pub mod orchestrator;
pub mod probe;
pub mod query;
pub mod report;
pub mod sink;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use orchestrator::DataCollectionService;
pub use report::{ModuleResult, UnifiedReport};
