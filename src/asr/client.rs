//! Streaming recognition client
//!
//! Drives one recognition session over the binary WebSocket protocol:
//! configuration frame, gzip-compressed audio segments, bounded best-effort
//! reads of cumulative hypotheses, and a final drain. The server sends whole
//! hypotheses rather than deltas, so accumulation is last-value-wins.
//!
//! All failures are represented in the returned [`RecognitionResult`];
//! nothing here raises to the caller.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::asr::frame::{
    decode_frame, encode_frame, CompressionMethod, MessageType, Serialization, ServerFrame,
};
use crate::audio::{preprocess, segment_pcm16, AudioBuffer};
use crate::cache::{sha256_bytes, ResultCache};
use crate::config::{Config, TARGET_SAMPLE_RATE};

/// Session phases, in the order a successful session passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    ConfigSent,
    AwaitConfigAck,
    Streaming,
    Draining,
    Done,
    Failed,
}

/// Metadata about one recognition attempt
#[derive(Debug, Clone, Default)]
pub struct RecognitionMeta {
    /// Wall-clock duration of the session in milliseconds
    pub elapsed_ms: u64,
    /// Number of audio segments uploaded
    pub segments: usize,
    /// Whether the text came from the local cache
    pub cache_hit: bool,
    /// Failure reason, when the session did not complete
    pub failure: Option<String>,
}

/// Outcome of a recognition attempt; failures are values, not errors
#[derive(Debug, Clone, Default)]
pub struct RecognitionResult {
    /// Accumulated recognized text (empty on failure)
    pub text: String,
    /// Session metadata for logging
    pub meta: RecognitionMeta,
}

impl RecognitionResult {
    fn failed(reason: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            text: String::new(),
            meta: RecognitionMeta {
                elapsed_ms,
                failure: Some(reason.into()),
                ..RecognitionMeta::default()
            },
        }
    }

    /// Whether the text is usable as a user utterance
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.meta.failure.is_none() && !self.text.trim().is_empty()
    }
}

/// WebSocket recognition client
pub struct Recognizer {
    ws_url: String,
    api_key: String,
    model: String,
    enable_punctuation: bool,
    segment_ms: u32,
    config_ack_timeout: Duration,
    partial_read_timeout: Duration,
    drain_budget: Duration,
    cache: Option<ResultCache>,
}

impl Recognizer {
    /// Build a recognizer from gateway configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            ws_url: config.asr_ws_url.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.asr_model.clone(),
            enable_punctuation: config.enable_punctuation,
            segment_ms: config.segment_ms,
            config_ack_timeout: config.config_ack_timeout,
            partial_read_timeout: config.partial_read_timeout,
            drain_budget: config.drain_budget,
            cache: config
                .enable_speech_cache
                .then(|| ResultCache::new(config.cache_asr_dir.clone())),
        }
    }

    /// Disable the recognition-side cache (used by tests)
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Recognize one utterance
    ///
    /// Preprocesses to mono 16 kHz PCM16, consults the content-addressed
    /// cache, then streams segments over the protocol. Failures come back as
    /// a marked result value.
    pub async fn transcribe(&self, buffer: AudioBuffer) -> RecognitionResult {
        let started = Instant::now();
        let pcm = preprocess(buffer).to_pcm16();
        if pcm.is_empty() {
            return RecognitionResult::failed("empty audio", 0);
        }

        let cache_key = sha256_bytes(&pcm);
        if let Some(cache) = &self.cache {
            if let Some(text) = cache.get_text(&cache_key) {
                tracing::debug!(key = %cache_key, "recognition cache hit");
                return RecognitionResult {
                    text,
                    meta: RecognitionMeta {
                        elapsed_ms: elapsed_ms(started),
                        cache_hit: true,
                        ..RecognitionMeta::default()
                    },
                };
            }
        }

        let segments = segment_pcm16(&pcm, TARGET_SAMPLE_RATE, self.segment_ms);
        let n_segments = segments.len();
        tracing::debug!(url = %self.ws_url, segments = n_segments, "opening recognition stream");

        match self.run_stream(segments).await {
            Ok(text) => {
                if !text.is_empty() {
                    if let Some(cache) = &self.cache {
                        if let Err(e) = cache.put_text(&cache_key, &text) {
                            tracing::warn!(error = %e, "failed to cache recognition text");
                        }
                    }
                }
                RecognitionResult {
                    text,
                    meta: RecognitionMeta {
                        elapsed_ms: elapsed_ms(started),
                        segments: n_segments,
                        ..RecognitionMeta::default()
                    },
                }
            }
            Err(reason) => {
                tracing::warn!(%reason, "recognition stream failed");
                let mut result = RecognitionResult::failed(reason, elapsed_ms(started));
                result.meta.segments = n_segments;
                result
            }
        }
    }

    /// Drive the protocol state machine for one session
    async fn run_stream(&self, segments: Vec<Vec<u8>>) -> Result<String, String> {
        let mut phase = Phase::Idle;
        tracing::trace!(?phase, "recognition session created");

        let mut request = self
            .ws_url
            .clone()
            .into_client_request()
            .map_err(|e| format!("bad ws url: {e}"))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| "invalid auth header".to_string())?,
        );

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| format!("connect: {e}"))?;
        let (mut sink, mut stream) = ws.split();

        // Configuration frame carries sequence 1; audio frames count up from there.
        let mut sequence: i32 = 1;
        let config_payload = serde_json::json!({
            "user": {"uid": "voicery-ws"},
            "audio": {
                "format": "pcm",
                "sample_rate": TARGET_SAMPLE_RATE,
                "bits": 16,
                "channel": 1,
                "codec": "raw",
            },
            "request": {
                "model_name": self.model,
                "enable_punc": self.enable_punctuation,
            },
        });
        let config_frame = encode_frame(
            MessageType::FullClientRequest,
            Some(sequence),
            Serialization::Json,
            CompressionMethod::Gzip,
            config_payload.to_string().as_bytes(),
        )
        .map_err(|e| e.to_string())?;

        sink.send(WsMessage::Binary(config_frame.into()))
            .await
            .map_err(|e| format!("send config: {e}"))?;
        phase = Phase::ConfigSent;
        tracing::trace!(?phase, "configuration frame sent");

        phase = Phase::AwaitConfigAck;
        tracing::trace!(?phase, "waiting for configuration acknowledgement");
        match tokio::time::timeout(self.config_ack_timeout, stream.next()).await {
            Ok(Some(Ok(msg))) => {
                // The ack payload is logged but nothing in it is required.
                if let Ok(frame) = decode_frame(&msg.into_data()) {
                    tracing::debug!(payload = ?frame.payload, "configuration acknowledged");
                }
            }
            Ok(Some(Err(e))) => return Err(format!("config ack: {e}")),
            Ok(None) => return Err("connection closed before config ack".to_string()),
            Err(_) => {
                phase = Phase::Failed;
                tracing::debug!(?phase, "no configuration acknowledgement");
                return Err("config timeout".to_string());
            }
        }

        phase = Phase::Streaming;
        tracing::trace!(?phase, "uploading audio segments");
        let mut accumulated = String::new();
        for segment in segments {
            sequence += 1;
            let frame = encode_frame(
                MessageType::AudioOnlyRequest,
                Some(sequence),
                Serialization::None,
                CompressionMethod::Gzip,
                &segment,
            )
            .map_err(|e| e.to_string())?;
            sink.send(WsMessage::Binary(frame.into()))
                .await
                .map_err(|e| format!("send audio: {e}"))?;

            // Best-effort partial read; silence here is normal.
            if let Ok(Some(Ok(msg))) =
                tokio::time::timeout(self.partial_read_timeout, stream.next()).await
            {
                if let Ok(frame) = decode_frame(&msg.into_data()) {
                    absorb_hypothesis(&mut accumulated, &frame);
                }
            }
        }

        phase = Phase::Draining;
        tracing::trace!(?phase, "all segments sent");
        let deadline = Instant::now() + self.drain_budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let per_read = Duration::from_secs(1).min(remaining);
            match tokio::time::timeout(per_read, stream.next()).await {
                Ok(Some(Ok(msg))) => {
                    if let Ok(frame) = decode_frame(&msg.into_data()) {
                        let is_last = frame.is_last;
                        absorb_hypothesis(&mut accumulated, &frame);
                        if is_last {
                            break;
                        }
                    }
                }
                // Closed or timed out: the final hypothesis is whatever we hold.
                _ => break,
            }
        }

        phase = Phase::Done;
        tracing::debug!(?phase, len = accumulated.chars().count(), "recognition complete");
        Ok(accumulated)
    }
}

/// Apply a server hypothesis frame to the accumulated text
///
/// Hypotheses are cumulative, so a differing value overwrites; equal values
/// and empty payloads leave the accumulation untouched.
fn absorb_hypothesis(accumulated: &mut String, frame: &ServerFrame) {
    if let Some(text) = frame.payload.recognized_text() {
        if text != accumulated {
            tracing::trace!(len = text.chars().count(), "hypothesis updated");
            text.clone_into(accumulated);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::frame::PayloadBody;

    fn hypothesis(text: &str, is_last: bool) -> ServerFrame {
        ServerFrame {
            message_type: MessageType::FullServerResponse,
            sequence: None,
            ack_sequence: None,
            error_code: None,
            is_last,
            payload: PayloadBody::Json(serde_json::json!({"result": {"text": text}})),
        }
    }

    #[test]
    fn hypotheses_overwrite_not_concatenate() {
        let mut acc = String::new();
        absorb_hypothesis(&mut acc, &hypothesis("你好", false));
        absorb_hypothesis(&mut acc, &hypothesis("你好世界", false));
        assert_eq!(acc, "你好世界");
    }

    #[test]
    fn empty_hypothesis_keeps_accumulated_text() {
        let mut acc = "你好".to_string();
        absorb_hypothesis(&mut acc, &hypothesis("", true));
        assert_eq!(acc, "你好");
    }

    #[tokio::test]
    async fn empty_audio_short_circuits() {
        let recognizer = Recognizer::new(&Config::default()).without_cache();
        let buffer = AudioBuffer::from_interleaved(Vec::new(), 16000, 1).unwrap();
        let result = recognizer.transcribe(buffer).await;
        assert!(!result.is_usable());
        assert_eq!(result.meta.failure.as_deref(), Some("empty audio"));
    }
}
