//! Fuzz target for the PSS message codec
//!
//! Decoding must never panic, and anything that decodes must survive a
//! re-encode. Unknown flag bits are dropped, so bytes may differ.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pss_core::MessageCodec;

fuzz_target!(|data: &[u8]| {
    let codec = MessageCodec::new(64 * 1024);
    if let Ok(msg) = codec.decode(data) {
        assert!(msg.to.len() <= 32);
        let encoded = codec.encode(&msg).expect("decoded message re-encodes");
        assert_eq!(encoded.len(), data.len());
        assert_eq!(codec.decode(&encoded).expect("reparse"), msg);
        let _ = msg.digest();
    }
});
