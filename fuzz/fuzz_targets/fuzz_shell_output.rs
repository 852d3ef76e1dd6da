//! Fuzz target for shell probe normalization.

#![no_main]

use hf_core::probe::NormalizedRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let record = NormalizedRecord::from_shell_output("probe", &text);
    // Readers must tolerate every shape
    let _ = record.items();
    let _ = record.first_str("enabled");
    let _ = record.get_bool("enabled");
    let _ = record.get_i64("enabled");
    assert_eq!(record, NormalizedRecord::from_shell_output("probe", &text));
});
