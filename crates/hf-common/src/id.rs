//! Module identity types.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Report keys that no module may use as its id.
pub const RESERVED_MODULE_IDS: &[&str] = &["metadata", "modules"];

/// Identifier of a collection module (e.g. `security`, `network`).
///
/// Ids are lowercase ASCII words separated by `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    /// Create a module id, normalizing surrounding whitespace and case.
    pub fn new(id: impl AsRef<str>) -> Self {
        ModuleId(id.as_ref().trim().to_ascii_lowercase())
    }

    /// Parse and validate a module id string.
    pub fn parse(s: &str) -> Option<Self> {
        let id = Self::new(s);
        if id.0.is_empty() {
            return None;
        }
        let valid = id
            .0
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        valid.then_some(id)
    }

    /// Whether this id collides with a fixed top-level report key.
    pub fn is_reserved(&self) -> bool {
        RESERVED_MODULE_IDS.contains(&self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        ModuleId::new(s)
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
