//! Configuration validation errors and semantic validation.

use crate::settings::AgentConfig;
use hf_common::ModuleId;
use std::collections::HashSet;
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::MissingField(_) => 14,
            ValidationError::InvalidValue { .. } => 15,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate agent configuration semantically.
pub fn validate_config(config: &AgentConfig) -> ValidationResult<()> {
    if config.engine_path.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("engine_path".to_string()));
    }
    if config.shell.as_os_str().is_empty() {
        return Err(ValidationError::MissingField("shell".to_string()));
    }
    if config.probe_timeout_secs == 0 {
        return Err(invalid("probe_timeout_secs", "must be greater than zero"));
    }
    if config.extension_ready_timeout_secs == 0 {
        return Err(invalid(
            "extension_ready_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.enabled_modules.is_empty() {
        return Err(invalid("enabled_modules", "at least one module is required"));
    }

    let mut seen = HashSet::new();
    for raw in &config.enabled_modules {
        let id = ModuleId::parse(raw)
            .ok_or_else(|| invalid("enabled_modules", format!("malformed module id '{}'", raw)))?;
        if id.is_reserved() {
            return Err(invalid(
                "enabled_modules",
                format!("'{}' is a reserved report key", id),
            ));
        }
        if !seen.insert(id.clone()) {
            return Err(invalid(
                "enabled_modules",
                format!("duplicate module id '{}'", id),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AgentConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let config = AgentConfig {
            probe_timeout_secs: 0,
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("probe_timeout_secs"));
        assert_eq!(err.code(), 15);

        let config = AgentConfig {
            extension_ready_timeout_secs: 0,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_empty_engine_path() {
        let config = AgentConfig {
            engine_path: PathBuf::new(),
            ..Default::default()
        };
        match validate_config(&config) {
            Err(ValidationError::MissingField(field)) => assert_eq!(field, "engine_path"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_module_lists() {
        let empty = AgentConfig {
            enabled_modules: vec![],
            ..Default::default()
        };
        assert!(validate_config(&empty).is_err());

        let duplicate = AgentConfig {
            enabled_modules: vec!["security".into(), "Security".into()],
            ..Default::default()
        };
        assert!(validate_config(&duplicate)
            .unwrap_err()
            .to_string()
            .contains("duplicate"));

        let reserved = AgentConfig {
            enabled_modules: vec!["metadata".into()],
            ..Default::default()
        };
        assert!(validate_config(&reserved).is_err());

        let malformed = AgentConfig {
            enabled_modules: vec!["rm -rf".into()],
            ..Default::default()
        };
        assert!(validate_config(&malformed).is_err());
    }
}
