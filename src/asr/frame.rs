//! Binary frame codec for the streaming recognition protocol
//!
//! Every frame starts with a 4-byte header packed as nibbles:
//!
//! ```text
//! byte 0: protocol version (high) | header length in 4-byte units (low)
//! byte 1: message type (high)     | type-specific flags (low)
//! byte 2: serialization (high)    | compression (low)
//! byte 3: reserved
//! ```
//!
//! With the sequence flag set, a 4-byte signed big-endian sequence number
//! follows the header. Payloads are length-prefixed with a 4-byte big-endian
//! size and optionally gzip-compressed JSON. Decode is tolerant: failed
//! decompression passes bytes through, failed JSON parse falls back to text.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::{Error, Result};

/// Protocol version carried in every header
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header length in 4-byte units (this implementation always sends one unit)
const HEADER_UNITS: u8 = 1;

/// Message type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client configuration request
    FullClientRequest,
    /// Audio-only upload
    AudioOnlyRequest,
    /// Full server response (hypotheses)
    FullServerResponse,
    /// Server acknowledgement
    ServerAck,
    /// Server error
    ServerError,
}

impl MessageType {
    const fn to_nibble(self) -> u8 {
        match self {
            Self::FullClientRequest => 0b0001,
            Self::AudioOnlyRequest => 0b0010,
            Self::FullServerResponse => 0b1001,
            Self::ServerAck => 0b1011,
            Self::ServerError => 0b1111,
        }
    }

    fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0b0001 => Ok(Self::FullClientRequest),
            0b0010 => Ok(Self::AudioOnlyRequest),
            0b1001 => Ok(Self::FullServerResponse),
            0b1011 => Ok(Self::ServerAck),
            0b1111 => Ok(Self::ServerError),
            other => Err(Error::Recognition(format!(
                "unknown message type nibble: {other:#06b}"
            ))),
        }
    }
}

/// Type-specific flag nibble
pub mod flags {
    /// No flags
    pub const NONE: u8 = 0b0000;
    /// Frame carries a positive sequence number
    pub const POS_SEQUENCE: u8 = 0b0001;
    /// Frame is the last of the stream
    pub const IS_LAST: u8 = 0b0010;
}

/// Serialization method nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    /// Raw bytes
    None,
    /// JSON object
    Json,
}

impl Serialization {
    const fn to_nibble(self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Json => 0b0001,
        }
    }
}

/// Compression method nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Uncompressed
    None,
    /// gzip
    Gzip,
}

impl CompressionMethod {
    const fn to_nibble(self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Gzip => 0b0001,
        }
    }
}

/// Encode a client frame: header, optional sequence, size-prefixed payload
///
/// # Errors
///
/// Returns [`Error::Recognition`] if gzip compression fails.
pub fn encode_frame(
    message_type: MessageType,
    sequence: Option<i32>,
    serialization: Serialization,
    compression: CompressionMethod,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let body = match compression {
        CompressionMethod::Gzip => gzip_compress(payload)?,
        CompressionMethod::None => payload.to_vec(),
    };
    let frame_flags = if sequence.is_some() {
        flags::POS_SEQUENCE
    } else {
        flags::NONE
    };
    let mut frame = Vec::with_capacity(8 + body.len() + 8);
    frame.push((PROTOCOL_VERSION << 4) | HEADER_UNITS);
    frame.push((message_type.to_nibble() << 4) | frame_flags);
    frame.push((serialization.to_nibble() << 4) | compression.to_nibble());
    frame.push(0x00);
    if let Some(seq) = sequence {
        frame.extend_from_slice(&seq.to_be_bytes());
    }
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decoded payload body after optional decompression and JSON parse
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadBody {
    /// Parsed JSON object
    Json(serde_json::Value),
    /// UTF-8 text (JSON parse failed or serialization = none)
    Text(String),
    /// Raw bytes (not valid UTF-8)
    Bytes(Vec<u8>),
}

impl PayloadBody {
    /// Pull the recognized-text field out of a hypothesis payload
    ///
    /// Server responses carry `{"result": {"text": "..."}}`; a bare string
    /// payload is taken as-is.
    #[must_use]
    pub fn recognized_text(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value
                .get("result")
                .and_then(|r| r.get("text"))
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty()),
            Self::Text(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// A decoded server frame
#[derive(Debug, Clone)]
pub struct ServerFrame {
    /// Message type from the header
    pub message_type: MessageType,
    /// Sequence number, when the sequence flag was set
    pub sequence: Option<i32>,
    /// Acknowledged sequence (ack frames)
    pub ack_sequence: Option<i32>,
    /// Error code (error frames)
    pub error_code: Option<u32>,
    /// Whether the server marked this frame as the last of the stream
    pub is_last: bool,
    /// Decoded payload
    pub payload: PayloadBody,
}

/// Decode a server frame
///
/// # Errors
///
/// Returns [`Error::Recognition`] for frames too short to carry the declared
/// header or size fields. Decompression and JSON failures are tolerated, not
/// errors.
#[allow(clippy::missing_panics_doc)] // slice bounds are checked before fixed-size conversions
pub fn decode_frame(data: &[u8]) -> Result<ServerFrame> {
    if data.len() < 4 {
        return Err(Error::Recognition(format!(
            "frame too short: {} bytes",
            data.len()
        )));
    }
    let header_units = (data[0] & 0x0F) as usize;
    let message_type = MessageType::from_nibble(data[1] >> 4)?;
    let frame_flags = data[1] & 0x0F;
    let serialization_json = (data[2] >> 4) == Serialization::Json.to_nibble();
    let gzipped = (data[2] & 0x0F) == CompressionMethod::Gzip.to_nibble();

    let mut rest = data
        .get(header_units * 4..)
        .ok_or_else(|| Error::Recognition("header length exceeds frame".to_string()))?;

    let mut sequence = None;
    if frame_flags & flags::POS_SEQUENCE != 0 {
        sequence = Some(read_i32(&mut rest)?);
    }
    let is_last = frame_flags & flags::IS_LAST != 0;

    let mut ack_sequence = None;
    let mut error_code = None;
    let body: &[u8] = match message_type {
        MessageType::FullServerResponse => {
            let size = read_u32(&mut rest)? as usize;
            rest.get(..size.min(rest.len())).unwrap_or(rest)
        }
        MessageType::ServerAck => {
            ack_sequence = Some(read_i32(&mut rest)?);
            if rest.len() >= 4 {
                let size = read_u32(&mut rest)? as usize;
                rest.get(..size.min(rest.len())).unwrap_or(rest)
            } else {
                &[]
            }
        }
        MessageType::ServerError => {
            error_code = Some(read_u32(&mut rest)?);
            let size = read_u32(&mut rest)? as usize;
            rest.get(..size.min(rest.len())).unwrap_or(rest)
        }
        MessageType::FullClientRequest | MessageType::AudioOnlyRequest => rest,
    };

    // Tolerate bad compression by passing bytes through unchanged
    let bytes = if gzipped {
        gzip_decompress(body).unwrap_or_else(|_| body.to_vec())
    } else {
        body.to_vec()
    };

    let payload = if serialization_json {
        serde_json::from_slice::<serde_json::Value>(&bytes).map_or_else(
            |_| match String::from_utf8(bytes.clone()) {
                Ok(text) => PayloadBody::Text(text),
                Err(_) => PayloadBody::Bytes(bytes.clone()),
            },
            PayloadBody::Json,
        )
    } else {
        match String::from_utf8(bytes.clone()) {
            Ok(text) => PayloadBody::Text(text),
            Err(_) => PayloadBody::Bytes(bytes),
        }
    };

    Ok(ServerFrame {
        message_type,
        sequence,
        ack_sequence,
        error_code,
        is_last,
        payload,
    })
}

fn read_i32(rest: &mut &[u8]) -> Result<i32> {
    let (head, tail) = rest
        .split_first_chunk::<4>()
        .ok_or_else(|| Error::Recognition("truncated i32 field".to_string()))?;
    *rest = tail;
    Ok(i32::from_be_bytes(*head))
}

fn read_u32(rest: &mut &[u8]) -> Result<u32> {
    let (head, tail) = rest
        .split_first_chunk::<4>()
        .ok_or_else(|| Error::Recognition("truncated u32 field".to_string()))?;
    *rest = tail;
    Ok(u32::from_be_bytes(*head))
}

/// gzip-compress a payload
///
/// # Errors
///
/// Returns [`Error::Recognition`] if the encoder fails.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| Error::Recognition(format!("gzip: {e}")))
}

fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a server-style frame the way the upstream service does
    fn server_response(seq: Option<i32>, is_last: bool, json: &serde_json::Value) -> Vec<u8> {
        let body = gzip_compress(json.to_string().as_bytes()).unwrap();
        let mut frame_flags = 0u8;
        if seq.is_some() {
            frame_flags |= flags::POS_SEQUENCE;
        }
        if is_last {
            frame_flags |= flags::IS_LAST;
        }
        let mut frame = vec![
            (PROTOCOL_VERSION << 4) | 1,
            (MessageType::FullServerResponse.to_nibble() << 4) | frame_flags,
            (Serialization::Json.to_nibble() << 4) | CompressionMethod::Gzip.to_nibble(),
            0x00,
        ];
        if let Some(s) = seq {
            frame.extend_from_slice(&s.to_be_bytes());
        }
        frame.extend_from_slice(&u32::try_from(body.len()).unwrap().to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    #[test]
    fn round_trip_preserves_type_flags_and_payload() {
        let payload = br#"{"result":{"text":"abc"}}"#;
        let frame = encode_frame(
            MessageType::FullServerResponse,
            Some(7),
            Serialization::Json,
            CompressionMethod::Gzip,
            payload,
        )
        .unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.message_type, MessageType::FullServerResponse);
        assert_eq!(decoded.sequence, Some(7));
        assert!(!decoded.is_last);
        assert_eq!(decoded.payload.recognized_text(), Some("abc"));
    }

    #[test]
    fn round_trip_uncompressed_text() {
        let frame = encode_frame(
            MessageType::FullServerResponse,
            None,
            Serialization::None,
            CompressionMethod::None,
            b"plain",
        )
        .unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.sequence, None);
        assert_eq!(decoded.payload, PayloadBody::Text("plain".to_string()));
    }

    #[test]
    fn header_bytes_are_nibble_packed() {
        let frame = encode_frame(
            MessageType::AudioOnlyRequest,
            Some(2),
            Serialization::None,
            CompressionMethod::Gzip,
            b"pcm",
        )
        .unwrap();
        assert_eq!(frame[0] >> 4, PROTOCOL_VERSION);
        assert_eq!(frame[0] & 0x0F, 1);
        assert_eq!(frame[1] >> 4, 0b0010);
        assert_eq!(frame[1] & 0x0F, flags::POS_SEQUENCE);
        assert_eq!(frame[2] & 0x0F, 0b0001);
        // sequence follows the 4-byte header
        assert_eq!(i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]), 2);
    }

    #[test]
    fn last_flag_decoded_from_server_frame() {
        let frame = server_response(
            Some(3),
            true,
            &serde_json::json!({"result": {"text": "你好世界"}}),
        );
        let decoded = decode_frame(&frame).unwrap();
        assert!(decoded.is_last);
        assert_eq!(decoded.payload.recognized_text(), Some("你好世界"));
    }

    #[test]
    fn bad_gzip_passes_bytes_through() {
        // claims gzip but carries plain text
        let mut frame = vec![
            (PROTOCOL_VERSION << 4) | 1,
            MessageType::FullServerResponse.to_nibble() << 4,
            CompressionMethod::Gzip.to_nibble(),
            0x00,
        ];
        frame.extend_from_slice(&5u32.to_be_bytes());
        frame.extend_from_slice(b"hello");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.payload, PayloadBody::Text("hello".to_string()));
    }

    #[test]
    fn bad_json_falls_back_to_text() {
        let mut frame = vec![
            (PROTOCOL_VERSION << 4) | 1,
            MessageType::FullServerResponse.to_nibble() << 4,
            Serialization::Json.to_nibble() << 4,
            0x00,
        ];
        frame.extend_from_slice(&8u32.to_be_bytes());
        frame.extend_from_slice(b"not json");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.payload, PayloadBody::Text("not json".to_string()));
    }

    #[test]
    fn ack_frame_carries_sequence() {
        let mut frame = vec![
            (PROTOCOL_VERSION << 4) | 1,
            MessageType::ServerAck.to_nibble() << 4,
            0x00,
            0x00,
        ];
        frame.extend_from_slice(&9i32.to_be_bytes());
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.message_type, MessageType::ServerAck);
        assert_eq!(decoded.ack_sequence, Some(9));
    }

    #[test]
    fn error_frame_carries_code() {
        let mut frame = vec![
            (PROTOCOL_VERSION << 4) | 1,
            MessageType::ServerError.to_nibble() << 4,
            0x00,
            0x00,
        ];
        frame.extend_from_slice(&45_000_000u32.to_be_bytes());
        frame.extend_from_slice(&4u32.to_be_bytes());
        frame.extend_from_slice(b"oops");
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.error_code, Some(45_000_000));
        assert_eq!(decoded.payload, PayloadBody::Text("oops".to_string()));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        assert!(decode_frame(&[0x11]).is_err());
    }
}
