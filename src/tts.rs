//! Speech synthesis client
//!
//! Turns reply text into an audio file via the HTTP synthesis endpoint,
//! fronted by the content-addressed cache. Synthesis failures degrade to a
//! text-only outcome rather than erroring, so a voice turn can still deliver
//! its transcript when the synthesis backend is down.

use std::path::PathBuf;
use std::time::Instant;

use base64::Engine as _;

use crate::cache::{synthesis_key, ResultCache};
use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Longest text accepted per synthesis request (chars)
const MAX_SYNTHESIS_CHARS: usize = 300;

/// Diagnostics attached to a synthesis outcome
#[derive(Debug, Clone, Default)]
pub struct SynthesisMeta {
    /// Wall-clock time of the request
    pub elapsed_ms: u64,
    /// Audio came from the cache, no request made
    pub cache_hit: bool,
    /// Input exceeded the length cap and was shortened
    pub truncated: bool,
    /// Why no audio was produced, if it wasn't
    pub failure: Option<String>,
}

/// Result of one synthesis attempt, audio optional by design
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    /// Path to the synthesized audio file, when synthesis succeeded
    pub audio_path: Option<PathBuf>,
    /// Diagnostics for logging and tests
    pub meta: SynthesisMeta,
}

impl SynthesisOutcome {
    fn failed(reason: impl Into<String>, elapsed_ms: u64, truncated: bool) -> Self {
        Self {
            audio_path: None,
            meta: SynthesisMeta {
                elapsed_ms,
                cache_hit: false,
                truncated,
                failure: Some(reason.into()),
            },
        }
    }
}

/// One entry of the published voice catalog
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VoiceInfo {
    /// Human-readable voice name
    #[serde(default)]
    pub voice_name: String,
    /// Identifier accepted by the synthesis endpoint
    #[serde(default)]
    pub voice_type: String,
    /// Preview clip URL, if published
    #[serde(default)]
    pub url: Option<String>,
    /// Catalog grouping, if published
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(serde::Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    data: String,
}

/// HTTP synthesis client with a content-addressed audio cache
pub struct SpeechSynthesizer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    voice: String,
    encoding: String,
    speed: f32,
    cache: Option<ResultCache>,
    retry: RetryPolicy,
}

impl SpeechSynthesizer {
    /// Build a synthesizer from gateway configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no API key is configured.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            voice: config.tts_voice.clone(),
            encoding: config.tts_encoding.clone(),
            speed: config.tts_speed,
            cache: config
                .enable_speech_cache
                .then(|| ResultCache::new(&config.cache_tts_dir)),
            retry: config.retry.clone(),
        })
    }

    /// Synthesize `text`, with overrides taking priority over configured
    /// voice and speed
    ///
    /// Never errors: failures are folded into the outcome's `meta.failure`.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_override: Option<&str>,
        speed_override: Option<f32>,
    ) -> SynthesisOutcome {
        let started = Instant::now();
        let voice = voice_override.unwrap_or(&self.voice);
        let speed = speed_override.unwrap_or(self.speed);

        let (text, truncated) = truncate_for_synthesis(text);
        if text.trim().is_empty() {
            return SynthesisOutcome::failed("empty text", elapsed_ms(started), false);
        }

        let key = synthesis_key(&text, voice, speed, &self.encoding);
        if let Some(cache) = &self.cache {
            if let Some(path) = cache.get_file(&key, &self.encoding) {
                tracing::debug!(key, "synthesis cache hit");
                return SynthesisOutcome {
                    audio_path: Some(path),
                    meta: SynthesisMeta {
                        elapsed_ms: elapsed_ms(started),
                        cache_hit: true,
                        truncated,
                        failure: None,
                    },
                };
            }
        }

        let audio = match self.request_audio(&text, voice, speed).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, voice, "synthesis request failed");
                return SynthesisOutcome::failed(
                    e.to_string(),
                    elapsed_ms(started),
                    truncated,
                );
            }
        };

        let path = match &self.cache {
            Some(cache) => cache.put_file(&key, &self.encoding, &audio),
            // Cache disabled: still need a file on disk for playback
            None => {
                let path = std::env::temp_dir().join(format!("voicery-{key}.{}", self.encoding));
                std::fs::write(&path, &audio)
                    .map_err(Error::Io)
                    .map(|()| path)
            }
        };
        match path {
            Ok(path) => SynthesisOutcome {
                audio_path: Some(path),
                meta: SynthesisMeta {
                    elapsed_ms: elapsed_ms(started),
                    cache_hit: false,
                    truncated,
                    failure: None,
                },
            },
            Err(e) => {
                SynthesisOutcome::failed(e.to_string(), elapsed_ms(started), truncated)
            }
        }
    }

    /// Fetch the published voice catalog
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] on a non-success status, [`Error::Http`]
    /// on transport failure.
    pub async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        let response = self
            .http
            .get(format!("{}/voice/list", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "voice list error {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }

    async fn request_audio(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        let payload = serde_json::json!({
            "audio": {
                "voice_type": voice,
                "encoding": self.encoding,
                "speed_ratio": speed,
            },
            "request": { "text": text },
        });

        let mut attempt = 0u32;
        let response = loop {
            let outcome = self
                .http
                .post(format!("{}/voice/tts", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await;
            match outcome {
                Ok(response) if response.status().is_success() => break response,
                Ok(response) => {
                    let status = response.status().as_u16();
                    if self.retry.should_retry(status, attempt) {
                        tracing::debug!(status, attempt, "retrying synthesis request");
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Synthesis(format!(
                        "synthesis API error {status}: {body}"
                    )));
                }
                Err(e) => {
                    if self.retry.should_retry_transport(attempt) {
                        tracing::debug!(error = %e, attempt, "retrying after transport failure");
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(Error::Http(e));
                }
            }
        };

        let parsed: SynthesisResponse = response.json().await?;
        if parsed.data.is_empty() {
            return Err(Error::Synthesis("response carried no audio data".into()));
        }
        base64::engine::general_purpose::STANDARD
            .decode(parsed.data.as_bytes())
            .map_err(|e| Error::Synthesis(format!("invalid base64 audio: {e}")))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Cap text at the synthesis length limit, marking the cut with an ellipsis
fn truncate_for_synthesis(text: &str) -> (String, bool) {
    let text = text.trim();
    if text.chars().count() <= MAX_SYNTHESIS_CHARS {
        return (text.to_string(), false);
    }
    let kept: String = text.chars().take(MAX_SYNTHESIS_CHARS).collect();
    (format!("{kept}……"), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        let (text, truncated) = truncate_for_synthesis("  你好世界  ");
        assert_eq!(text, "你好世界");
        assert!(!truncated);
    }

    #[test]
    fn long_text_capped_with_ellipsis() {
        let long = "好".repeat(MAX_SYNTHESIS_CHARS + 50);
        let (text, truncated) = truncate_for_synthesis(&long);
        assert!(truncated);
        assert_eq!(text.chars().count(), MAX_SYNTHESIS_CHARS + 2);
        assert!(text.ends_with("……"));
    }

    #[tokio::test]
    async fn repeat_synthesis_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("test-key".to_string()),
            cache_tts_dir: dir.path().join("tts"),
            enable_speech_cache: true,
            ..Config::default()
        };
        let key = synthesis_key(
            "你好",
            &config.tts_voice,
            config.tts_speed,
            &config.tts_encoding,
        );
        let cached = ResultCache::new(&config.cache_tts_dir)
            .put_file(&key, &config.tts_encoding, b"RIFFfake")
            .unwrap();

        // base_url is unroutable, so a hit must come without a request
        let synthesizer = SpeechSynthesizer::new(&config).unwrap();
        let outcome = synthesizer.synthesize("你好", None, None).await;
        assert!(outcome.meta.cache_hit);
        assert!(outcome.meta.failure.is_none());
        assert_eq!(outcome.audio_path, Some(cached));
    }

    #[test]
    fn voice_catalog_tolerates_partial_entries() {
        let voices: Vec<VoiceInfo> = serde_json::from_str(
            r#"[{"voice_name":"小云","voice_type":"qiniu_zh_female_xyqxxj","category":"中文"},
                {"voice_type":"qiniu_zh_male_abc"}]"#,
        )
        .unwrap();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].voice_name, "小云");
        assert!(voices[1].voice_name.is_empty());
        assert_eq!(voices[1].url, None);
        assert_eq!(voices[1].category, None);
    }
}
