//! Engine output parsing.

use super::{QueryError, QueryResult, Row};
use serde_json::Value;

/// Substrings (lowercased) that mark engine output as a failure.
const ERROR_MARKERS: &[&str] = &["error", "no such table"];

/// Parse fast-path stdout, which must be exactly a JSON array of objects.
pub fn parse_rows(text: &str) -> Result<QueryResult, QueryError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| QueryError::InvalidOutput(format!("engine output is not JSON: {}", e)))?;
    rows_from_value(value)
}

/// Parse interactive-session stdout.
///
/// Everything from the first `[` through the last `]` is taken as the row
/// array. Output with no brackets is an empty result unless an error marker
/// appears in stdout or stderr.
pub fn parse_session_output(stdout: &str, stderr: &str) -> Result<QueryResult, QueryError> {
    match bracketed(stdout) {
        Some(json) => {
            let value: Value = serde_json::from_str(json).map_err(|e| {
                QueryError::InvalidOutput(format!("bracketed output is not JSON: {}", e))
            })?;
            rows_from_value(value)
        }
        None => match error_line(stdout).or_else(|| error_line(stderr)) {
            Some(line) => Err(QueryError::ExecutionFailed(line)),
            None => Ok(Vec::new()),
        },
    }
}

/// Drop readiness handshake residue from session output.
pub fn strip_marker_lines(text: &str, column: &str) -> String {
    text.lines()
        .filter(|line| !line.contains(column))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether `.tables` output lists `table` exactly.
pub fn lists_table(text: &str, table: &str) -> bool {
    text.lines().any(|line| {
        line.trim()
            .strip_prefix("=>")
            .map(|name| name.trim().eq_ignore_ascii_case(table))
            .unwrap_or(false)
    })
}

fn bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

fn error_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(str::to_string)
}

fn rows_from_value(value: Value) -> Result<QueryResult, QueryError> {
    let Value::Array(items) = value else {
        return Err(QueryError::InvalidOutput(
            "engine output is not a JSON array".to_string(),
        ));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, cell_text(v)))
                .collect::<Row>()),
            other => Err(QueryError::InvalidOutput(format!(
                "row is not an object: {}",
                other
            ))),
        })
        .collect()
}

/// Engine cells are strings; anything else is rendered as text.
fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
