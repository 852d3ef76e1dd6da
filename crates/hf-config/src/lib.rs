//! hostfacts configuration loading and validation.
//!
//! This crate provides:
//! - The typed agent configuration (`config.json`)
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Environment overrides applied on top of the file
//! - Semantic validation

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_config_path, ConfigSource, ResolvedPath};
pub use settings::{load_config, AgentConfig, ConfigError, LoadedConfig, DEFAULT_MODULES};
pub use validate::{validate_config, ValidationError, ValidationResult};
