//! Fuzz target for the daemon config (torrc) parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_torrc_parser
//!
//! Whatever parses must survive a render/parse round trip unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use prysm_core::torrc::TorrcDocument;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(doc) = TorrcDocument::parse(s) else {
        return;
    };
    let reparsed = TorrcDocument::parse(&doc.render()).expect("rendered document must parse");
    assert_eq!(doc.directives(), reparsed.directives());
});
