//! Chat completion and classification transport
//!
//! An OpenAI-compatible chat completions client consumed by the turn
//! pipeline and skills as an opaque capability: `complete` for whole
//! replies, `complete_chunks` for lazy SSE fragments, `classify` for the
//! intent distribution. The [`ChatCompleter`] trait is the seam tests mock.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::dispatch::SkillId;
use crate::retry::RetryPolicy;
use crate::session::Message;
use crate::{Error, Result};

/// Chat completion capability consumed by the pipeline and skills
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Produce one whole reply for a message list
    async fn complete(&self, messages: &[Message], max_tokens: u32, stream: bool)
        -> Result<String>;

    /// Produce a reply as a lazy sequence of text fragments
    async fn complete_chunks(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<mpsc::Receiver<String>>;

    /// Classify an utterance: intent summary plus raw per-skill weights
    ///
    /// Weights are raw model output; normalization is the dispatcher's job.
    async fn classify(&self, text: &str) -> Result<(String, HashMap<String, f64>)>;
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    choices: Vec<StreamChoice>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: Option<DeltaContent>,
}

#[derive(serde::Deserialize)]
struct DeltaContent {
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct ClassifierPayload {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    confidence: HashMap<String, serde_json::Value>,
}

/// OpenAI-compatible chat completions client
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl ChatClient {
    /// Build a client from gateway configuration
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
            model: config.llm_model.clone(),
            temperature: config.temperature,
            retry: config.retry.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn payload(&self, messages: &[Message], max_tokens: u32, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "stream": stream,
        })
    }

    /// POST with the injected retry policy
    async fn post_with_retry(&self, payload: &serde_json::Value) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .http
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(payload)
                .send()
                .await;
            match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    if self.retry.should_retry(status, attempt) {
                        tracing::debug!(status, attempt, "retrying completion request");
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::Completion(format!(
                        "completion API error {status}: {body}"
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
        }
    }
}

#[async_trait]
impl ChatCompleter for ChatClient {
    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        stream: bool,
    ) -> Result<String> {
        if stream {
            let mut rx = self.complete_chunks(messages, max_tokens).await?;
            let mut full = String::new();
            while let Some(piece) = rx.recv().await {
                full.push_str(&piece);
            }
            return Ok(full.trim().to_string());
        }

        let response = self
            .post_with_retry(&self.payload(messages, max_tokens, false))
            .await?;
        let parsed: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse completion response");
            e
        })?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }

    async fn complete_chunks(
        &self,
        messages: &[Message],
        max_tokens: u32,
    ) -> Result<mpsc::Receiver<String>> {
        let response = self
            .post_with_retry(&self.payload(messages, max_tokens, true))
            .await?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut pending = String::new();
            while let Some(chunk) = stream.next().await {
                let Ok(bytes) = chunk else { break };
                pending.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].to_string();
                    pending.drain(..=pos);
                    match parse_sse_line(&line) {
                        SseEvent::Piece(piece) => {
                            if tx.send(piece).await.is_err() {
                                return;
                            }
                        }
                        SseEvent::Done => return,
                        SseEvent::Skip => {}
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn classify(&self, text: &str) -> Result<(String, HashMap<String, f64>)> {
        let mut sys_prompt = String::from(
            "你是一个严格的JSON分类器。只输出一个JSON对象，不要任何多余文字或解释。\n\n\
             字段说明：\n\
             - intent：用4~10个中文动词短语，概括\u{201c}用户到底想让你帮他做什么\u{201d}，不要复述原文。\n\
             - confidence：一个对象，对下列候选项逐一给出置信度，所有值相加必须等于1。\n\
             候选项与含义如下：\n",
        );
        for skill in SkillId::CANDIDATES {
            sys_prompt.push_str(&format!("- {}：{}\n", skill.as_str(), skill.description()));
        }
        sys_prompt.push_str(
            "\n注意：\n\
             1) 只输出JSON，不要加任何文本。\n\
             2) confidence 里的键必须与给定候选项完全一致（区分大小写），每个都有值。\n\
             3) 所有置信度是0~1之间的小数，总和=1。\n",
        );

        let messages = [
            Message::system(sys_prompt),
            Message::user(format!("输入文本：{text}\n请仅按上述schema输出JSON。")),
        ];
        let raw = self.complete(&messages, 220, false).await?;

        let payload: ClassifierPayload = extract_json(&raw)
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_else(|| {
                tracing::warn!(raw = %raw, "classifier output was not parseable JSON");
                ClassifierPayload {
                    intent: String::new(),
                    confidence: HashMap::new(),
                }
            });

        let weights = payload
            .confidence
            .into_iter()
            .map(|(k, v)| (k, v.as_f64().unwrap_or(0.0)))
            .collect();
        Ok((payload.intent, weights))
    }
}

/// Outcome of parsing one SSE line
enum SseEvent {
    /// A content fragment
    Piece(String),
    /// The `[DONE]` sentinel
    Done,
    /// Nothing useful (blank line, comment, unparseable delta)
    Skip,
}

/// Parse one `data:` line of an OpenAI-style SSE stream
fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(delta) = serde_json::from_str::<StreamDelta>(payload) else {
        // Skip non-JSON keep-alives and fragments with reasoning-only fields
        return SseEvent::Skip;
    };
    let piece = delta
        .choices
        .first()
        .and_then(|c| c.delta.as_ref())
        .and_then(|d| d.content.as_deref())
        .unwrap_or_default();
    if piece.is_empty() {
        SseEvent::Skip
    } else {
        SseEvent::Piece(clean_piece(piece))
    }
}

/// Drop control characters (keeping newlines) from a streamed fragment
fn clean_piece(piece: &str) -> String {
    piece
        .chars()
        .filter(|&ch| ch == '\n' || ch >= ' ')
        .collect()
}

/// Slice the first top-level JSON object out of a raw completion
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_yields_content_piece() {
        let line = r#"data: {"choices":[{"delta":{"content":"你好"}}]}"#;
        match parse_sse_line(line) {
            SseEvent::Piece(piece) => assert_eq!(piece, "你好"),
            _ => panic!("expected a content piece"),
        }
    }

    #[test]
    fn sse_done_sentinel_recognized() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseEvent::Done));
    }

    #[test]
    fn sse_non_data_lines_skipped() {
        assert!(matches!(parse_sse_line(""), SseEvent::Skip));
        assert!(matches!(parse_sse_line(": keep-alive"), SseEvent::Skip));
        assert!(matches!(parse_sse_line("data: not json"), SseEvent::Skip));
    }

    #[test]
    fn extract_json_slices_braces() {
        let raw = "好的，这是结果：{\"intent\":\"测试\"} 完毕";
        assert_eq!(extract_json(raw), Some("{\"intent\":\"测试\"}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn clean_piece_strips_control_chars() {
        assert_eq!(clean_piece("a\u{7}b\nc"), "ab\nc");
    }

    #[test]
    fn classifier_payload_tolerates_odd_values() {
        let payload: ClassifierPayload = serde_json::from_str(
            r#"{"intent":"求强化","confidence":{"steelman":"0.9","x_exam":0.1}}"#,
        )
        .unwrap();
        let weights: HashMap<String, f64> = payload
            .confidence
            .into_iter()
            .map(|(k, v)| (k, v.as_f64().unwrap_or(0.0)))
            .collect();
        // string-typed weights coerce to 0; the dispatcher renormalizes
        assert!((weights["steelman"]).abs() < f64::EPSILON);
        assert!((weights["x_exam"] - 0.1).abs() < 1e-9);
    }
}
