//! Property-based tests for frame encoding and stream decoding
//!
//! These tests check the codec for ALL payloads, not just hand-picked ones:
//! round-trips must be exact, and the decoder must yield the same messages no
//! matter how the byte stream is cut into reads.

use bytes::{Bytes, BytesMut};
use giesela_proto::{ClientMessage, Frame, FrameDecoder};
use proptest::prelude::*;

/// Strategy for arbitrary UTF-8 payloads, including multi-byte characters
fn arbitrary_payload() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9;:/?&=._ éü★-]{0,256}").expect("valid regex")
}

#[test]
fn prop_frame_encode_decode_roundtrip() {
    proptest!(|(payload in arbitrary_payload())| {
        let frame = Frame::from(payload.as_str());
        let wire = frame.to_bytes();

        let decoded = Frame::decode(&wire).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded.as_str().expect("utf-8"), payload.as_str());
        prop_assert_eq!(wire.len(), frame.encoded_len());
    });
}

#[test]
fn prop_prefix_is_utf8_byte_length() {
    proptest!(|(payload in arbitrary_payload())| {
        let wire = Frame::from(payload.as_str()).to_bytes();
        let expected = format!("{}=={}", payload.len(), payload);

        prop_assert_eq!(wire, Bytes::from(expected));
    });
}

#[test]
fn prop_decoder_is_independent_of_read_boundaries() {
    proptest!(|(
        payloads in prop::collection::vec(arbitrary_payload(), 1..8),
        chunk in 1usize..32,
    )| {
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend_from_slice(&Frame::from(payload.as_str()).to_bytes());
        }

        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();

        for piece in stream.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(msg) = decoder.decode(&mut buf).expect("decode should succeed") {
                decoded.push(String::from_utf8(msg.to_vec()).expect("utf-8"));
            }
        }

        // PROPERTY: Same messages in the same order regardless of chunking
        prop_assert_eq!(decoded, payloads);
        prop_assert!(buf.is_empty());
    });
}

#[test]
fn prop_parse_never_panics() {
    proptest!(|(body in ".{0,128}")| {
        let _ = ClientMessage::parse(&body);
    });
}

#[test]
fn prop_send_information_binds_room_and_user() {
    proptest!(|(
        room in "[a-z0-9]{1,12}",
        user in "[a-z0-9]{1,12}",
    )| {
        let body = format!("REQUEST;{room};{user};SEND_INFORMATION");
        let msg = ClientMessage::parse(&body).expect("well-formed");

        prop_assert_eq!(msg.binding(), Some((room.as_str(), user.as_str())));
    });
}
