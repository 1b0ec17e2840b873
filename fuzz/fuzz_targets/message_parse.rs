//! Fuzz target for ClientMessage::parse
//!
//! Parsing must never panic, and a sentinel-addressed message must never
//! produce a room binding.

#![no_main]

use giesela_proto::{ClientMessage, USER_IDENTIFICATION};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(message) = ClientMessage::parse(text) {
        if let Some((room_id, _)) = message.binding() {
            assert_ne!(room_id, USER_IDENTIFICATION);
        }
    }
});
