//! Process execution for probes.
//!
//! Everything that launches an external program goes through a
//! [`CommandRunner`], so collection can be driven against a scripted
//! runner in tests.

pub mod session;
pub mod tool_runner;

pub use session::{InteractiveSession, ProcessSession};
pub use tool_runner::{
    CommandRunner, ToolConfig, ToolError, ToolOutput, ToolRunner, ToolRunnerBuilder, ToolSpec,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS,
};
