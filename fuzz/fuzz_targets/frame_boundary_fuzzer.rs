//! Fuzz target for FrameDecoder reassembly
//!
//! # Strategy
//!
//! - Payloads around the size ceiling: empty, small, at-max, just-over-max
//! - Declared length: exact, short, long, absurd
//! - Delivery: the encoded stream split at arbitrary chunk boundaries
//!
//! # Invariants
//!
//! - Declared lengths above the ceiling MUST return `FrameTooLarge`
//! - Honest frames MUST decode to their payloads regardless of chunking
//! - The decoder MUST never panic

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use giesela_proto::{Frame, FrameDecoder, ProtocolError};
use libfuzzer_sys::fuzz_target;

const MAX_FRAME_SIZE: usize = 1024;

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Empty,
    Small(u8),
    AtMax,
    JustOverMax,
}

#[derive(Debug, Clone, Arbitrary)]
enum DeclaredLength {
    Exact,
    Short(u8),
    Long(u8),
    Absurd(u64),
}

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryInput {
    size: PayloadSize,
    declared: DeclaredLength,
    fill: u8,
    chunks: Vec<u8>,
}

fuzz_target!(|input: BoundaryInput| {
    let len = match input.size {
        PayloadSize::Empty => 0,
        PayloadSize::Small(n) => usize::from(n),
        PayloadSize::AtMax => MAX_FRAME_SIZE,
        PayloadSize::JustOverMax => MAX_FRAME_SIZE + 1,
    };
    // Printable ASCII keeps the payload valid UTF-8
    let byte = b' ' + input.fill % 95;
    let payload = String::from_utf8(vec![byte; len]).unwrap_or_default();

    let (wire, honest) = match input.declared {
        DeclaredLength::Exact => (Frame::from(payload.clone()).to_bytes().to_vec(), true),
        DeclaredLength::Short(d) => {
            (format!("{}=={payload}", len.saturating_sub(usize::from(d))).into_bytes(), d == 0)
        },
        DeclaredLength::Long(d) => {
            (format!("{}=={payload}", len + usize::from(d)).into_bytes(), d == 0)
        },
        DeclaredLength::Absurd(n) => (format!("{n}=={payload}").into_bytes(), n as usize == len),
    };

    let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
    let mut buffer = BytesMut::new();
    let mut decoded = Vec::new();
    let mut rest = wire.as_slice();

    for step in input.chunks.iter().map(|c| usize::from(*c).max(1)).chain(std::iter::once(usize::MAX)) {
        let take = step.min(rest.len());
        buffer.extend_from_slice(&rest[..take]);
        rest = &rest[take..];

        loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(frame)) => decoded.push(frame),
                Ok(None) => break,
                Err(ProtocolError::FrameTooLarge { size, max }) => {
                    assert!(size > max);
                    return;
                },
                Err(_) => return,
            }
        }

        if rest.is_empty() {
            break;
        }
    }

    if honest && len <= MAX_FRAME_SIZE {
        assert_eq!(decoded.first().map(|p| p.as_ref()), Some(payload.as_bytes()));
    }
});
