//! Fuzz target for envelope parsing and opening
//!
//! Arbitrary plaintext envelopes and ciphertexts must be rejected cleanly.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pss_crypto::envelope::parse_envelope;
use pss_crypto::{CryptoBackend, DefaultCrypto, UnwrapParams};

#[derive(Debug, Arbitrary)]
struct EnvelopeInput {
    key: [u8; 32],
    data: Vec<u8>,
}

fuzz_target!(|input: EnvelopeInput| {
    if let Ok(layout) = parse_envelope(&input.data) {
        assert!(layout.payload.end <= input.data.len());
        assert!(layout.padding.end <= input.data.len());
        assert!(layout.payload.end <= layout.padding.start);
    }

    let crypto = DefaultCrypto::default();
    if let Ok(received) = crypto.unwrap(&input.data, &UnwrapParams::symmetric(&input.key)) {
        let _ = received.payload();
        let _ = received.sender();
    }
});
