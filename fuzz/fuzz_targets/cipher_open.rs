//! Fuzz target for the cipher plugins
//!
//! Opening arbitrary bytes must fail cleanly rather than panic.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sidp_crypto::{CipherKind, SessionKey};

#[derive(Debug, Arbitrary)]
struct CipherInput {
    key: [u8; 32],
    xsalsa: bool,
    sealed: Vec<u8>,
    aad: Vec<u8>,
}

fuzz_target!(|input: CipherInput| {
    let kind = if input.xsalsa {
        CipherKind::XSalsa20
    } else {
        CipherKind::Aes256
    };
    let key = SessionKey::new(input.key);

    let _ = kind.decrypt(&key, &input.sealed, &input.aad);

    if let Ok(sealed) = kind.encrypt(&key, &input.sealed, &input.aad) {
        let _ = kind.decrypt(&key, &sealed, &input.aad);
    }
});
