//! Fuzz target for the extension-table reference scanner.

#![no_main]

use hf_core::query::ExtensionTableSet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(query) = std::str::from_utf8(data) else {
        return;
    };
    let set = ExtensionTableSet::default();
    let tables = set.referenced_tables(query);
    assert_eq!(set.requires_extension(query), !tables.is_empty());
    assert!(tables.iter().all(|t| set.contains(t)));
});
