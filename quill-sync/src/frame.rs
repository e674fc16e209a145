//! Wire framing for delta messages.
//!
//! Wire format:
//! ```text
//! Key:Value\n
//! Key:Value\n
//! \n
//! <body, exactly Content-Length bytes>
//! ```
//!
//! Only `Content-Length` is required. Values are captured verbatim after
//! the first `:`, so the encoder's `Content-Length: 12` reads back as
//! `" 12"`; surrounding whitespace is ignored only when parsing the number.
//!
//! The decoder is a two-state machine (`AwaitingHeader`, `AwaitingBody`)
//! over a caller-owned buffer, usable through `tokio_util::codec::FramedRead`
//! or synchronously through [`FrameDecoder`].

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::FrameError;
use crate::patch::Delta;

/// Name of the only required header.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Default upper bound on a frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Default upper bound on a header block (8 KiB).
pub const DEFAULT_MAX_HEADER_LEN: usize = 8 * 1024;

const DELIMITER: &[u8] = b"\n\n";

/// Frame header: case-sensitive, unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: HashMap<String, String>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a header block (without the trailing blank line).
    ///
    /// Lines split on the first `:`; lines with an empty key are dropped and
    /// a repeated key keeps its last value.
    pub fn parse(block: &[u8]) -> Self {
        let text = String::from_utf8_lossy(block);
        let mut fields = HashMap::new();
        for line in text.split('\n') {
            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value),
                None => (line, ""),
            };
            if key.is_empty() {
                continue;
            }
            fields.insert(key.to_string(), value.to_string());
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared body length.
    pub fn content_length(&self) -> Result<usize, FrameError> {
        let raw = self
            .get(CONTENT_LENGTH)
            .ok_or(FrameError::MissingContentLength)?;
        raw.trim()
            .parse::<usize>()
            .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Bytes,
}

impl Message {
    /// Build a message carrying `body`, with its `Content-Length` filled in.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut header = Header::new();
        header.insert(CONTENT_LENGTH, format!(" {}", body.len()));
        Self { header, body }
    }

    /// Serialize a delta into a message body.
    pub fn from_delta(delta: &Delta) -> Result<Self, FrameError> {
        let body =
            serde_json::to_vec(delta).map_err(|e| FrameError::InvalidBody(e.to_string()))?;
        Ok(Self::new(body))
    }

    /// Interpret the body as a delta.
    pub fn delta(&self) -> Result<Delta, FrameError> {
        serde_json::from_slice(&self.body).map_err(|e| FrameError::InvalidBody(e.to_string()))
    }

    /// Wire bytes for this message.
    pub fn to_frame(&self) -> Bytes {
        encode_frame(&self.body)
    }
}

/// Produce `Content-Length: N\n\n<body>`, N being the raw byte length.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let prefix = format!("{CONTENT_LENGTH}: {}\n\n", body.len());
    let mut out = BytesMut::with_capacity(prefix.len() + body.len());
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(body);
    out.freeze()
}

/// Encode a delta straight to wire bytes.
pub fn encode_delta(delta: &Delta) -> Result<Bytes, FrameError> {
    Ok(Message::from_delta(delta)?.to_frame())
}

#[derive(Debug, Clone)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody { header: Header, len: usize },
}

/// Streaming frame decoder.
///
/// Holds only parse state; the byte buffer belongs to the caller
/// (`FramedRead` or [`FrameDecoder`]).
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_frame_len: usize,
    max_header_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_HEADER_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize, max_header_len: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            max_frame_len,
            max_header_len,
        }
    }

    /// Whether the codec is between frames.
    pub fn is_awaiting_header(&self) -> bool {
        matches!(self.state, DecodeState::AwaitingHeader)
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::AwaitingHeader) {
                DecodeState::AwaitingHeader => {
                    let Some(pos) = find_delimiter(src) else {
                        if src.len() > self.max_header_len {
                            return Err(FrameError::HeaderTooLarge {
                                max: self.max_header_len,
                            });
                        }
                        return Ok(None);
                    };
                    let header = Header::parse(&src[..pos]);
                    src.advance(pos + DELIMITER.len());

                    let len = header.content_length()?;
                    if len > self.max_frame_len {
                        return Err(FrameError::FrameTooLarge {
                            len,
                            max: self.max_frame_len,
                        });
                    }
                    src.reserve(len.saturating_sub(src.len()));
                    self.state = DecodeState::AwaitingBody { header, len };
                }
                DecodeState::AwaitingBody { header, len } => {
                    if src.len() < len {
                        self.state = DecodeState::AwaitingBody { header, len };
                        return Ok(None);
                    }
                    let body = src.split_to(len).freeze();
                    log::trace!("decoded frame with {} byte body", body.len());
                    return Ok(Some(Message { header, body }));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => {
                // A partial frame dies with its connection.
                if !src.is_empty() {
                    log::debug!("discarding {} bytes of partial frame at eof", src.len());
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Synchronous decoder that owns its buffer.
///
/// Accepts chunks of any size and returns every frame they complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
        }
    }

    /// Feed one chunk; returns the frames it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Message>, FrameError> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(message) = self.codec.decode(&mut self.buf)? {
            out.push(message);
        }
        Ok(out)
    }

    /// Bytes held for the next frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{DiffPatcher, Patcher};

    fn decode_all(chunks: &[&[u8]]) -> Vec<Message> {
        let mut decoder = FrameDecoder::default();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push(chunk).unwrap());
        }
        out
    }

    #[test]
    fn test_encode_frame_format() {
        let frame = encode_frame(b"hello");
        assert_eq!(&frame[..], b"Content-Length: 5\n\nhello");
    }

    #[test]
    fn test_encode_uses_byte_length() {
        let body = "héllo wörld ✓".as_bytes();
        let frame = encode_frame(body);
        let expected = format!("Content-Length: {}\n\n", body.len());
        assert!(frame.starts_with(expected.as_bytes()));
        assert_ne!(body.len(), "héllo wörld ✓".chars().count());

        let messages = decode_all(&[&frame]);
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].body[..], body);
    }

    #[test]
    fn test_single_chunk_decode() {
        let frame = encode_frame(b"{\"a\":1}");
        let messages = decode_all(&[&frame]);
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].body[..], b"{\"a\":1}");
        assert_eq!(messages[0].header.get(CONTENT_LENGTH), Some(" 7"));
        assert_eq!(messages[0].header.content_length().unwrap(), 7);
    }

    #[test]
    fn test_byte_at_a_time_decode() {
        let body = "multi\n\nline body with a blank line".as_bytes();
        let frame = encode_frame(body);
        let chunks: Vec<&[u8]> = frame.chunks(1).collect();
        let messages = decode_all(&chunks);
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].body[..], body);
    }

    #[test]
    fn test_every_split_point_yields_same_message() {
        let frame = encode_frame("split → anywhere".as_bytes());
        let whole = decode_all(&[&frame]);
        for split in 0..=frame.len() {
            let (a, b) = frame.split_at(split);
            assert_eq!(decode_all(&[a, b]), whole, "split at {split}");
        }
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut joined = BytesMut::new();
        joined.extend_from_slice(&encode_frame(b"first"));
        joined.extend_from_slice(&encode_frame(b"second"));

        let messages = decode_all(&[&joined]);
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].body[..], b"first");
        assert_eq!(&messages[1].body[..], b"second");
    }

    #[test]
    fn test_trailing_partial_frame_retained() {
        let mut decoder = FrameDecoder::default();
        let second = encode_frame(b"second");
        let mut chunk = BytesMut::new();
        chunk.extend_from_slice(&encode_frame(b"first"));
        chunk.extend_from_slice(&second[..4]);

        let first = decoder.push(&chunk).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.buffered(), 4);

        let rest = decoder.push(&second[4..]).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(&rest[0].body[..], b"second");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_header_without_space_and_extra_fields() {
        let raw = b"X-Origin:peer:1\nContent-Length:3\n\nabc";
        let messages = decode_all(&[raw]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.get("X-Origin"), Some("peer:1"));
        assert_eq!(&messages[0].body[..], b"abc");
    }

    #[test]
    fn test_header_parse_rules() {
        let header = Header::parse(b":ignored\nNoColon\nKey:first\nKey:second\nkey:lower");
        assert_eq!(header.get("NoColon"), Some(""));
        assert_eq!(header.get("Key"), Some("second"));
        assert_eq!(header.get("key"), Some("lower"));
        assert_eq!(header.len(), 3);
    }

    #[test]
    fn test_zero_length_body() {
        let messages = decode_all(&[b"Content-Length: 0\n\n"]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].body.is_empty());
    }

    #[test]
    fn test_missing_content_length_is_error() {
        let mut decoder = FrameDecoder::default();
        let err = decoder.push(b"Garbage\n\n").unwrap_err();
        assert!(matches!(err, FrameError::MissingContentLength));
    }

    #[test]
    fn test_non_numeric_content_length_is_error() {
        let mut decoder = FrameDecoder::default();
        let err = decoder.push(b"Content-Length: twelve\n\n").unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(_)));

        let mut decoder = FrameDecoder::default();
        let err = decoder.push(b"Content-Length: -4\n\n").unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(_)));
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = FrameDecoder::new(FrameCodec::new(8, DEFAULT_MAX_HEADER_LEN));
        let err = decoder.push(b"Content-Length: 9\n\n").unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { len: 9, max: 8 }));
    }

    #[test]
    fn test_header_too_large() {
        let mut decoder = FrameDecoder::new(FrameCodec::new(DEFAULT_MAX_FRAME_LEN, 16));
        assert!(decoder.push(b"Content-Length: ").unwrap().is_empty());
        let err = decoder.push(b"1234567890").unwrap_err();
        assert!(matches!(err, FrameError::HeaderTooLarge { max: 16 }));
    }

    #[test]
    fn test_decode_eof_discards_partial() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"Content-Length: 10\n\nabc"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_message_delta_roundtrip() {
        let delta = DiffPatcher::default().compute("", "hello");
        let frame = encode_delta(&delta).unwrap();
        let messages = decode_all(&[&frame]);
        assert_eq!(messages[0].delta().unwrap(), delta);
    }

    #[test]
    fn test_invalid_body_is_error() {
        let message = Message::new(&b"not json"[..]);
        assert!(matches!(message.delta(), Err(FrameError::InvalidBody(_))));
    }

    #[test]
    fn test_codec_returns_to_header_state() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"Content-Length: 2\n\na"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(!codec.is_awaiting_header());
        buf.extend_from_slice(b"b");
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.is_awaiting_header());
    }
}
