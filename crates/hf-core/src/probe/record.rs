//! Uniform key-value record produced by a probe.

use crate::query::QueryResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which engine rows (and shell JSON arrays) are wrapped.
pub const ITEMS_KEY: &str = "items";

/// Result of one probe, whichever source produced it.
///
/// Two shapes occur in practice:
///
/// - engine rows wrapped as `{"items": [{...}, ...]}`
/// - a flat object from a shell probe, e.g. `{"ard_enabled": "true"}`
///
/// The accessors below read both shapes, so callers never branch on which
/// source answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRecord(Map<String, Value>);

impl NormalizedRecord {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wrap engine rows under `items`.
    pub fn from_rows(rows: QueryResult) -> Self {
        let items = rows
            .into_iter()
            .map(|row| {
                Value::Object(
                    row.into_iter()
                        .map(|(k, v)| (k, Value::String(v)))
                        .collect(),
                )
            })
            .collect();
        let mut map = Map::new();
        map.insert(ITEMS_KEY.to_string(), Value::Array(items));
        Self(map)
    }

    /// Normalize shell probe stdout.
    ///
    /// JSON objects pass through unwrapped, JSON arrays are wrapped under
    /// `items`, and anything else is stored as trimmed text under `label`.
    pub fn from_shell_output(label: &str, text: &str) -> Self {
        let trimmed = text.trim();
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Self(map),
            Ok(Value::Array(items)) => {
                let mut map = Map::new();
                map.insert(ITEMS_KEY.to_string(), Value::Array(items));
                Self(map)
            }
            _ => {
                let mut map = Map::new();
                map.insert(label.to_string(), Value::String(trimmed.to_string()));
                Self(map)
            }
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// True when there is nothing to read: no keys, or an empty `items`.
    pub fn is_empty(&self) -> bool {
        match self.0.get(ITEMS_KEY) {
            Some(Value::Array(items)) if self.0.len() == 1 => items.is_empty(),
            _ => self.0.is_empty(),
        }
    }

    /// Row objects in either shape; a flat record is its own single row.
    pub fn items(&self) -> Vec<&Map<String, Value>> {
        match self.0.get(ITEMS_KEY) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ if self.0.is_empty() => Vec::new(),
            _ => vec![&self.0],
        }
    }

    /// Value for `key`, looked up at the top level then in the first row.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(key) {
            return Some(value);
        }
        self.items().into_iter().find_map(|row| row.get(key))
    }

    /// `key` rendered as text. Empty strings count as absent.
    pub fn first_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text).filter(|s| !s.is_empty())
    }

    /// `key` read as a flag.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(value_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// `key` from every row, skipping rows without it.
    pub fn column(&self, key: &str) -> Vec<String> {
        self.items()
            .into_iter()
            .filter_map(|row| row.get(key).and_then(value_text))
            .collect()
    }
}

pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn value_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => parse_flag(s),
        _ => None,
    }
}

/// Interpret common textual flag spellings.
pub fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Row;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rows_are_wrapped() {
        let record = NormalizedRecord::from_rows(vec![row(&[("enabled", "1")])]);
        assert_eq!(record.into_value(), json!({"items": [{"enabled": "1"}]}));
    }

    #[test]
    fn test_shell_object_passes_through() {
        let record = NormalizedRecord::from_shell_output("ard", "{\"ard_enabled\":\"true\"}\n");
        assert_eq!(record.clone().into_value(), json!({"ard_enabled": "true"}));
        assert_eq!(record.get_bool("ard_enabled"), Some(true));
    }

    #[test]
    fn test_shell_array_is_wrapped() {
        let record = NormalizedRecord::from_shell_output("x", "[{\"a\":1},{\"a\":2}]");
        assert_eq!(record.items().len(), 2);
        assert_eq!(record.column("a"), vec!["1", "2"]);
    }

    #[test]
    fn test_shell_text_uses_label() {
        let record = NormalizedRecord::from_shell_output("hostname", "  mac-01.local \n");
        assert_eq!(record.into_value(), json!({"hostname": "mac-01.local"}));
    }

    #[test]
    fn test_accessors_read_both_shapes() {
        let wrapped = NormalizedRecord::from_rows(vec![row(&[("enabled", "1")])]);
        let flat = NormalizedRecord::from_shell_output("g", "{\"enabled\": true}");
        assert_eq!(wrapped.get_bool("enabled"), Some(true));
        assert_eq!(flat.get_bool("enabled"), Some(true));
        assert_eq!(wrapped.items().len(), 1);
        assert_eq!(flat.items().len(), 1);
    }

    #[test]
    fn test_is_empty() {
        assert!(NormalizedRecord::from_rows(vec![]).is_empty());
        assert!(NormalizedRecord::default().is_empty());
        assert!(!NormalizedRecord::from_shell_output("x", "").is_empty());
    }

    #[test]
    fn test_first_str_skips_blank() {
        let record = NormalizedRecord::from_shell_output("x", "{\"serial\": \" \", \"n\": 3}");
        assert_eq!(record.first_str("serial"), None);
        assert_eq!(record.first_str("n").as_deref(), Some("3"));
        assert_eq!(record.get_i64("n"), Some(3));
    }

    #[test]
    fn test_parse_flag() {
        for t in ["1", "TRUE", "yes", "On", "enabled"] {
            assert_eq!(parse_flag(t), Some(true), "{t}");
        }
        for f in ["0", "false", "No", "off", "disabled"] {
            assert_eq!(parse_flag(f), Some(false), "{f}");
        }
        assert_eq!(parse_flag("maybe"), None);
    }
}
