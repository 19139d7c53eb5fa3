//! Configuration for the Voicery gateway
//!
//! A plain struct with sensible defaults; `from_env` overlays values from the
//! environment. Process-level configuration loading (dotenv files, CLI) is
//! the caller's concern.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Sample rate the recognition protocol requires (Hz)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Voicery gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for chat completion and synthesis endpoints
    pub base_url: String,

    /// WebSocket endpoint for streaming recognition
    pub asr_ws_url: String,

    /// Bearer credential for all transports
    pub api_key: Option<String>,

    /// Chat completion model identifier
    pub llm_model: String,

    /// Sampling temperature for completions
    pub temperature: f32,

    /// Max tokens for a full text reply
    pub max_tokens_response: u32,

    /// Conversation rounds retained in session history
    pub max_rounds: usize,

    /// Minimum classifier confidence required to trigger a skill
    pub intent_conf_threshold: f64,

    /// Recognition model name sent in the configuration frame
    pub asr_model: String,

    /// Request punctuated hypotheses from the recognizer
    pub enable_punctuation: bool,

    /// Duration of one uploaded audio segment (ms)
    pub segment_ms: u32,

    /// Wait for the configuration acknowledgement frame
    pub config_ack_timeout: Duration,

    /// Best-effort wait for a partial hypothesis after each segment
    pub partial_read_timeout: Duration,

    /// Total wall-clock budget for draining final hypotheses
    pub drain_budget: Duration,

    /// Default synthesis voice
    pub tts_voice: String,

    /// Synthesis audio encoding ("wav", "mp3", ...)
    pub tts_encoding: String,

    /// Default synthesis speed ratio
    pub tts_speed: f32,

    /// Directory for cached synthesis audio
    pub cache_tts_dir: PathBuf,

    /// Directory for cached recognition text
    pub cache_asr_dir: PathBuf,

    /// Enable the recognition/synthesis result cache
    pub enable_speech_cache: bool,

    /// Character budget per sentence unit in voice mode
    pub max_reply_chars_voice: usize,

    /// HTTP read timeout (generation can be slow)
    pub request_timeout: Duration,

    /// Retry policy injected into the HTTP clients
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://openai.qiniu.com/v1".to_string(),
            asr_ws_url: "wss://openai.qiniu.com/v1/voice/asr".to_string(),
            api_key: None,
            llm_model: "doubao-seed-1.6-flash".to_string(),
            temperature: 0.7,
            max_tokens_response: 512,
            max_rounds: 8,
            intent_conf_threshold: 0.6,
            asr_model: "asr".to_string(),
            enable_punctuation: true,
            segment_ms: 300,
            config_ack_timeout: Duration::from_secs(10),
            partial_read_timeout: Duration::from_millis(500),
            drain_budget: Duration::from_secs(3),
            tts_voice: "qiniu_zh_female_xyqxxj".to_string(),
            tts_encoding: "wav".to_string(),
            tts_speed: 1.0,
            cache_tts_dir: PathBuf::from("cache/tts"),
            cache_asr_dir: PathBuf::from("cache/asr"),
            enable_speech_cache: true,
            max_reply_chars_voice: 120,
            request_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Build a configuration from defaults plus environment overrides
    ///
    /// Recognized variables: `VOICERY_API_KEY` (falls back to `API_KEY`),
    /// `VOICERY_BASE_URL`, `VOICERY_ASR_WS_URL`, `VOICERY_MODEL`,
    /// `VOICERY_TTS_VOICE`, `VOICERY_CACHE_DIR`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.api_key = std::env::var("VOICERY_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok();
        if let Ok(url) = std::env::var("VOICERY_BASE_URL") {
            cfg.base_url = url;
        }
        if let Ok(url) = std::env::var("VOICERY_ASR_WS_URL") {
            cfg.asr_ws_url = url;
        }
        if let Ok(model) = std::env::var("VOICERY_MODEL") {
            cfg.llm_model = model;
        }
        if let Ok(voice) = std::env::var("VOICERY_TTS_VOICE") {
            cfg.tts_voice = voice;
        }
        if let Ok(dir) = std::env::var("VOICERY_CACHE_DIR") {
            let root = PathBuf::from(dir);
            cfg.cache_tts_dir = root.join("tts");
            cfg.cache_asr_dir = root.join("asr");
        }
        cfg
    }

    /// Bearer credential, or a config error if unset
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if no API key is configured.
    pub fn require_api_key(&self) -> crate::Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| crate::Error::Config("API key not configured".to_string()))
    }
}
