//! Fuzz target for configuration parsing
//!
//! Tests that arbitrary TOML never panics the loader or the validator.

#![no_main]

use libfuzzer_sys::fuzz_target;
use stratus_core::TransferConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = TransferConfig::from_toml_str(text) {
        let _ = config.validate();
        let _ = config.to_toml_string();
    }
});
