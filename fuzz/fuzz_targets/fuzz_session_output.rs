//! Fuzz target for interactive-session output parsing.
//!
//! Session stdout mixes banners, handshake residue, and row arrays; parsing
//! must return a result or an error for any input.

#![no_main]

use hf_core::query::output::{lists_table, parse_session_output, strip_marker_lines};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (stdout, stderr) = text.split_once('\0').unwrap_or((text, ""));
    let stripped = strip_marker_lines(stdout, "hf_marker");
    let _ = parse_session_output(&stripped, stderr);
    let _ = lists_table(stdout, "mdm");
});
