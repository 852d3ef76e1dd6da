//! Exit codes for the hostfacts CLI.
//!
//! Ranges:
//! - 0-9: operational outcomes
//! - 10-19: user or environment errors
//! - 20-29: internal errors

use hf_common::Error;

/// Process exit codes. Stable for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every requested module is in the report.
    Clean = 0,

    /// The report was produced but some requested modules are missing.
    PartialReport = 1,

    /// Invalid arguments
    ArgsError = 10,

    /// Configuration missing, unreadable, or invalid
    ConfigError = 11,

    /// Requested module id is not registered
    ModuleNotFound = 12,

    /// Internal error (bug)
    InternalError = 20,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Code name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PartialReport => "OK_PARTIAL",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::ModuleNotFound => "ERR_MODULE_NOT_FOUND",
            ExitCode::InternalError => "ERR_INTERNAL",
        }
    }

    /// Exit code for a report holding `collected` of `requested` modules.
    pub fn for_report(collected: usize, requested: usize) -> Self {
        if collected >= requested {
            ExitCode::Clean
        } else {
            ExitCode::PartialReport
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) => ExitCode::ConfigError,
            Error::ModuleNotFound(_) => ExitCode::ModuleNotFound,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::Clean.is_success());
        assert!(!ExitCode::PartialReport.is_success());
        assert!(!ExitCode::PartialReport.is_error());
        assert!(ExitCode::ModuleNotFound.is_error());
        assert_eq!(i32::from(ExitCode::InternalError), 20);
    }

    #[test]
    fn test_for_report() {
        assert_eq!(ExitCode::for_report(5, 5), ExitCode::Clean);
        assert_eq!(ExitCode::for_report(4, 5), ExitCode::PartialReport);
        assert_eq!(ExitCode::for_report(0, 0), ExitCode::Clean);
    }

    #[test]
    fn test_from_error() {
        let err = Error::ModuleNotFound("bogus".into());
        assert_eq!(ExitCode::from(&err), ExitCode::ModuleNotFound);
        assert_eq!(
            ExitCode::from(&Error::Config("bad".into())),
            ExitCode::ConfigError
        );
        assert_eq!(ExitCode::ModuleNotFound.to_string(), "ERR_MODULE_NOT_FOUND (12)");
    }
}
