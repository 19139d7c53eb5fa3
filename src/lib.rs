//! Voicery - Real-time voice conversation gateway
//!
//! This library provides the core of a spoken conversation loop:
//! - Audio preprocessing (downmix, resample, PCM16 framing)
//! - Streaming speech recognition over a binary WebSocket protocol
//! - Two-tier intent dispatch (keyword rules, then an LLM classifier)
//! - A turn pipeline with per-sentence reply synthesis
//! - A content-addressed cache for recognition and synthesis results
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     CLI / UI                         │
//! │        chat  │  voice <wav>  │  voices              │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Pipeline                        │
//! │  Dispatcher  │  Skills  │  Session  │  Sentences    │
//! └──────┬──────────────┬──────────────────┬────────────┘
//!        │              │                  │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌─────────▼───────────┐
//! │ Recognizer │ │ Completions │ │    Synthesizer      │
//! │  (WS/ASR)  │ │ (HTTP/SSE)  │ │  (HTTP, cached)     │
//! └────────────┘ └─────────────┘ └─────────────────────┘
//! ```

pub mod asr;
pub mod audio;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod role;
pub mod session;
pub mod skills;
pub mod textseg;
pub mod tts;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{TurnEvent, TurnOutcome, TurnPipeline};
