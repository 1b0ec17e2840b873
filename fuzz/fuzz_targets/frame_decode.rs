//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the decoder. Anything that decodes must
//! survive an encode/decode cycle unchanged (leading zeros in the prefix are
//! accepted on input but never produced).

#![no_main]

use giesela_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(Frame::decode(&frame.to_bytes()).ok(), Some(frame));
    }
});
