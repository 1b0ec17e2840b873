//! Length-prefixed text frames.
//!
//! A `Frame` is one logical protocol message. On the wire it looks like:
//!
//! ```text
//! <N>==<payload>
//! ```
//!
//! where `N` is the decimal byte length of the UTF-8 payload. Server to client
//! traffic is always framed. Client to server traffic may be framed or bare
//! text; see [`FrameDecoder`] for how both are told apart.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Separator between the length prefix and the payload.
pub const SEPARATOR: &[u8; 2] = b"==";

/// Default ceiling for a single inbound message.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Longest length prefix we accept. Anything longer is bare text.
const MAX_LENGTH_DIGITS: usize = 10;

/// One protocol message.
///
/// # Invariants
///
/// - The encoded prefix always equals `payload.len()`; it is computed at
///   encode time, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Wrap a payload.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Payload as text.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidUtf8` if the payload is not UTF-8
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Number of bytes [`Frame::encode`] will write.
    pub fn encoded_len(&self) -> usize {
        decimal_digits(self.payload.len()) + SEPARATOR.len() + self.payload.len()
    }

    /// Write `<N>==<payload>` into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.payload.len().to_string().as_bytes());
        dst.put_slice(SEPARATOR);
        dst.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode exactly one complete frame.
    ///
    /// The input must contain the prefix, the separator and precisely the
    /// declared number of payload bytes. Use [`FrameDecoder`] for streams.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidLength` if there is no numeric prefix
    /// - `ProtocolError::MissingSeparator` if the prefix is not followed by
    ///   `==`
    /// - `ProtocolError::LengthMismatch` if the payload is shorter or longer
    ///   than declared
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let digits = leading_digits(bytes);
        if digits == 0 || digits > MAX_LENGTH_DIGITS {
            return Err(ProtocolError::InvalidLength(prefix_lossy(bytes)));
        }

        if bytes.get(digits..digits + SEPARATOR.len()) != Some(SEPARATOR.as_slice()) {
            return Err(ProtocolError::MissingSeparator);
        }

        let declared = parse_length(&bytes[..digits])?;
        let payload = &bytes[digits + SEPARATOR.len()..];
        if payload.len() != declared {
            return Err(ProtocolError::LengthMismatch { declared, actual: payload.len() });
        }

        Ok(Self { payload: Bytes::copy_from_slice(payload) })
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Incremental decoder for a connection's receive buffer.
///
/// Buffered bytes that begin with `<digits>==` are a framed message: the
/// decoder waits until the declared payload has fully arrived, so a frame
/// split across TCP segments is reassembled and several frames in one read are
/// yielded one by one.
///
/// Anything else is a bare legacy message. Legacy clients send one message per
/// write and carry no length, so the whole buffered chunk is taken as one
/// message.
///
/// A bare message made only of digits looks like the start of a length
/// prefix, so `decode` keeps waiting on it. Callers that see
/// [`FrameDecoder::awaiting_prefix`] hold for a while should take it with
/// [`FrameDecoder::flush_bare`].
///
/// # Invariants
///
/// - Never yields a payload larger than `max_frame_size`.
/// - A framed payload is yielded only once all declared bytes are buffered.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    /// Create a decoder with the given per-message ceiling.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Take the next complete message out of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes are
    /// removed from `src`; anything after a complete frame stays buffered.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if a declared length or a bare message
    ///   exceeds the ceiling
    /// - `ProtocolError::InvalidLength` if the prefix does not fit a `usize`
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.is_empty() {
            return Ok(None);
        }

        let digits = leading_digits(src);
        if digits == 0 || digits > MAX_LENGTH_DIGITS {
            return self.take_bare(src);
        }

        match src.get(digits..digits + SEPARATOR.len()) {
            Some(sep) if sep == SEPARATOR => {},
            Some(_) => return self.take_bare(src),
            None => {
                // Prefix may still be arriving
                if src.get(digits).is_none_or(|b| *b == b'=') {
                    return Ok(None);
                }
                return self.take_bare(src);
            },
        }

        let declared = parse_length(&src[..digits])?;
        if declared > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: declared, max: self.max_frame_size });
        }

        let header_len = digits + SEPARATOR.len();
        if src.len() < header_len + declared {
            src.reserve(header_len + declared - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        Ok(Some(src.split_to(declared).freeze()))
    }

    /// Whether `src` holds nothing but an unfinished length prefix (`<digits>`
    /// or `<digits>=`).
    pub fn awaiting_prefix(&self, src: &[u8]) -> bool {
        let digits = leading_digits(src);
        if digits == 0 || digits > MAX_LENGTH_DIGITS {
            return false;
        }
        match &src[digits..] {
            [] | [b'='] => true,
            _ => false,
        }
    }

    /// Take everything buffered as one bare message.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the buffer exceeds the ceiling
    pub fn flush_bare(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.is_empty() {
            return Ok(None);
        }
        self.take_bare(src)
    }

    fn take_bare(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: src.len(), max: self.max_frame_size });
        }

        Ok(Some(src.split().freeze()))
    }
}

fn leading_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn parse_length(digits: &[u8]) -> Result<usize> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(prefix_lossy(digits)))
}

fn prefix_lossy(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_LENGTH_DIGITS + SEPARATOR.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut FrameDecoder, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn encode_prefixes_byte_length() {
        assert_eq!(Frame::from("pong").to_bytes(), Bytes::from_static(b"4==pong"));

        // "é" is two bytes in UTF-8
        let frame = Frame::from("MESSAGE;café");
        assert_eq!(frame.to_bytes(), Bytes::from("13==MESSAGE;café"));
        assert_eq!(frame.encoded_len(), frame.to_bytes().len());
    }

    #[test]
    fn empty_payload_encodes_zero_length() {
        let frame = Frame::new(Bytes::new());
        assert_eq!(frame.to_bytes(), Bytes::from_static(b"0=="));
        assert_eq!(Frame::decode(b"0==").unwrap(), frame);
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert!(matches!(Frame::decode(b"pong"), Err(ProtocolError::InvalidLength(_))));
        assert!(matches!(Frame::decode(b"4=pong"), Err(ProtocolError::MissingSeparator)));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let err = Frame::decode(b"10==pong").unwrap_err();
        assert_eq!(err, ProtocolError::LengthMismatch { declared: 10, actual: 4 });
    }

    #[test]
    fn decoder_reassembles_split_frame() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"11==COMM"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"AND;a;b");
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"COMMAND;a;b")));
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_waits_for_partial_prefix() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"4"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"=");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"=ping");
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"ping")));
    }

    #[test]
    fn decoder_yields_back_to_back_frames() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"4==ping4==exit"[..]);
        let msgs = decode_all(&mut decoder, &mut buf);
        assert_eq!(msgs, vec![Bytes::from_static(b"ping"), Bytes::from_static(b"exit")]);
    }

    #[test]
    fn decoder_takes_bare_chunk_as_one_message() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"REQUEST;42;7;SEND_INFORMATION"[..]);
        let msgs = decode_all(&mut decoder, &mut buf);
        assert_eq!(msgs, vec![Bytes::from_static(b"REQUEST;42;7;SEND_INFORMATION")]);
    }

    #[test]
    fn decoder_treats_digits_without_separator_as_bare() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"12;room;user"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"12;room;user")));
    }

    #[test]
    fn digits_only_message_waits_until_flushed() {
        let mut decoder = FrameDecoder::default();
        let mut buf = BytesMut::from(&b"123"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(decoder.awaiting_prefix(&buf));
        assert_eq!(decoder.flush_bare(&mut buf).unwrap(), Some(Bytes::from_static(b"123")));
        assert!(buf.is_empty());
        assert_eq!(decoder.flush_bare(&mut buf).unwrap(), None);
    }

    #[test]
    fn awaiting_prefix_only_for_unfinished_prefix() {
        let decoder = FrameDecoder::default();
        assert!(decoder.awaiting_prefix(b"4="));
        assert!(!decoder.awaiting_prefix(b"4==pi"));
        assert!(!decoder.awaiting_prefix(b"ping"));
        assert!(!decoder.awaiting_prefix(b""));
    }

    #[test]
    fn decoder_rejects_oversized_declaration() {
        let mut decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(&b"17==aaaa"[..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, ProtocolError::FrameTooLarge { size: 17, max: 16 });
    }

    #[test]
    fn decoder_rejects_oversized_bare_chunk() {
        let mut decoder = FrameDecoder::new(4);
        let mut buf = BytesMut::from(&b"hello"[..]);
        assert!(matches!(decoder.decode(&mut buf), Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn decimal_digits_matches_to_string() {
        for n in [0, 9, 10, 99, 100, 65_535, usize::MAX] {
            assert_eq!(decimal_digits(n), n.to_string().len());
        }
    }
}
