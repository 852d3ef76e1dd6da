//! Fuzz target for config.json parsing and validation.

#![no_main]

use hf_config::{validate_config, AgentConfig};
use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = AgentConfig::from_json(text, Path::new("config.json")) {
        let _ = validate_config(&config);
    }
});
