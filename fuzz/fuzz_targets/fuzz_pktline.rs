//! Fuzz target for pkt-line parsing.
//!
//! The reader must never panic, and every data packet it returns must
//! re-encode to the bytes it was read from (hex digits compared without
//! regard to case).

#![no_main]

use gitgate_git::{PktLine, PktLineReader};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = PktLineReader::new(Cursor::new(data));
    let mut offset = 0usize;

    // Bounded so crafted input cannot loop for long.
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(pkt @ PktLine::Data(_))) => {
                let encoded = pkt.encode();
                let original = &data[offset..offset + encoded.len()];
                assert!(original[..4].eq_ignore_ascii_case(&encoded[..4]));
                assert_eq!(&original[4..], &encoded[4..]);
                offset += encoded.len();
            }
            Ok(Some(_)) => offset += 4,
            Ok(None) | Err(_) => break,
        }
    }
});
