//! Fuzz test for configuration file parsing
//!
//! Arbitrary TOML must never panic the loader or the validator.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pss_core::node::PssConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _: Result<toml::Value, _> = toml::from_str(s);

        // Accepted configs must survive a round trip through TOML.
        if let Ok(config) = PssConfig::from_toml_str(s) {
            let text = config.to_toml_string().expect("serializable config");
            let again = PssConfig::from_toml_str(&text).expect("reparse");
            assert_eq!(again.sym_key_decrypt_cache_capacity, config.sym_key_decrypt_cache_capacity);
        }
    }
});
