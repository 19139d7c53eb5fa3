//! Streaming speech recognition
//!
//! A binary length-prefixed frame protocol over a long-lived WebSocket, and
//! the client state machine that drives it.

pub mod client;
pub mod frame;

pub use client::{RecognitionMeta, RecognitionResult, Recognizer};
pub use frame::{
    decode_frame, encode_frame, CompressionMethod, MessageType, PayloadBody, Serialization,
    ServerFrame,
};
