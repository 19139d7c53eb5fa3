//! Turn orchestration
//!
//! Two modes over one skill-or-generic-reply primitive:
//!
//! - **Full-turn**: dispatch the whole utterance, run the selected skill or a
//!   generic completion, append the exchange to the session.
//! - **Sentence-streaming**: recognize the whole utterance, split it into
//!   sentence-like units, and for each unit produce a short reply plus its
//!   synthesized audio, emitting a [`TurnEvent`] the moment the unit is
//!   ready. Session state is mutated only after a unit's reply is finalized,
//!   so dropping the receiver between units leaves the session consistent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

use crate::asr::Recognizer;
use crate::audio::AudioBuffer;
use crate::config::Config;
use crate::dispatch::{IntentDispatcher, RouteDecision, SkillId};
use crate::llm::ChatCompleter;
use crate::role::RoleConfig;
use crate::session::{Message, SessionState};
use crate::skills;
use crate::textseg::split_for_tts;
use crate::tts::SpeechSynthesizer;
use crate::{Error, Result};

/// Fixed reply when recognition yields nothing usable
pub const RETRY_PROMPT: &str = "语音识别未成功，请重录或改用文本输入。";

/// Outcome of one full conversational turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The assistant's reply
    pub reply_text: String,
    /// Skill that produced the reply, if any
    pub skill: Option<SkillId>,
    /// Skill display tag for UIs
    pub display_tag: Option<&'static str>,
    /// How the dispatcher decided
    pub route: RouteDecision,
    /// Recognized user text (voice mode only)
    pub recognized: Option<String>,
    /// Synthesized reply audio (voice mode only)
    pub audio_path: Option<PathBuf>,
}

/// Progress events emitted by sentence-streaming mode
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Phase transition for UI status lines
    Status(String),
    /// Recognition finished; `units` is the number of sentence units
    Recognized { text: String, units: usize },
    /// One finished unit: short reply plus its audio, in utterance order
    Unit {
        index: usize,
        total: usize,
        user_text: String,
        reply_text: String,
        audio_path: Option<PathBuf>,
    },
    /// The turn is over; no further events follow
    Done,
}

/// Orchestrates conversational turns over the shared completion client
///
/// Cheap to clone; voice modes require speech clients via [`Self::with_speech`].
#[derive(Clone)]
pub struct TurnPipeline {
    config: Arc<Config>,
    role: Arc<RoleConfig>,
    llm: Arc<dyn ChatCompleter>,
    dispatcher: IntentDispatcher,
    recognizer: Option<Arc<Recognizer>>,
    synthesizer: Option<Arc<SpeechSynthesizer>>,
}

impl TurnPipeline {
    /// Build a text-only pipeline
    #[must_use]
    pub fn new(config: Config, role: RoleConfig, llm: Arc<dyn ChatCompleter>) -> Self {
        let dispatcher = IntentDispatcher::new(config.intent_conf_threshold);
        Self {
            config: Arc::new(config),
            role: Arc::new(role),
            llm,
            dispatcher,
            recognizer: None,
            synthesizer: None,
        }
    }

    /// Attach the speech clients required by the voice modes
    #[must_use]
    pub fn with_speech(mut self, recognizer: Recognizer, synthesizer: SpeechSynthesizer) -> Self {
        self.recognizer = Some(Arc::new(recognizer));
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    /// The active role
    #[must_use]
    pub fn role(&self) -> &RoleConfig {
        &self.role
    }

    /// One full-turn exchange on text input
    ///
    /// # Errors
    ///
    /// Propagates completion transport errors; dispatch itself never errors.
    pub async fn respond_text(
        &self,
        state: &mut SessionState,
        user_text: &str,
    ) -> Result<TurnOutcome> {
        let route = self
            .dispatcher
            .route(user_text, Some(self.llm.as_ref()))
            .await;

        let (reply_text, skill, display_tag) = if route.is_skill() {
            let skill = skills::lookup(route.skill)
                .ok_or_else(|| Error::Classifier("routed to unknown skill".to_string()))?;
            let history = state.recent_messages(self.config.max_rounds);
            let output = skill
                .run(user_text, &self.role, history, self.llm.as_ref())
                .await?;
            tracing::info!(
                skill = output.skill.as_str(),
                confidence = route.confidence,
                "skill turn"
            );
            (output.reply_text, Some(output.skill), Some(output.display_tag))
        } else {
            let system_prompt = build_system_prompt(&self.role);
            let messages = assemble_messages(
                &system_prompt,
                state.recent_messages(self.config.max_rounds),
                user_text,
            );
            let reply = self
                .llm
                .complete(&messages, self.config.max_tokens_response, true)
                .await?;
            tracing::info!(reply_len = reply.chars().count(), "generic turn");
            (reply, None, None)
        };

        state.append_turn(
            Message::user(user_text),
            Message::assistant(&reply_text),
            self.config.max_rounds,
        );
        state.set_last_skill(skill);

        Ok(TurnOutcome {
            reply_text,
            skill,
            display_tag,
            route,
            recognized: None,
            audio_path: None,
        })
    }

    /// A brevity-constrained reply for voice mode
    ///
    /// # Errors
    ///
    /// Propagates completion transport errors.
    pub async fn respond_short(
        &self,
        state: &mut SessionState,
        user_text: &str,
    ) -> Result<String> {
        let limit = self.config.max_reply_chars_voice;
        let system_prompt = format!(
            "{}\n【重要】请用1-2句中文回答，总字数不超过{limit}字。如需展开，请最后问：要继续吗？",
            build_system_prompt(&self.role)
        );
        let messages = assemble_messages(
            &system_prompt,
            state.recent_messages(self.config.max_rounds),
            user_text,
        );
        let reply = self.llm.complete(&messages, 256, false).await?;
        state.append_turn(
            Message::user(user_text),
            Message::assistant(&reply),
            self.config.max_rounds,
        );
        Ok(reply)
    }

    /// Whole-utterance voice turn: recognize, reply, synthesize once
    ///
    /// Recognition and synthesis failures degrade (fixed retry prompt /
    /// missing audio path) rather than erroring.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without speech clients attached, and
    /// propagates completion transport errors.
    pub async fn respond_voice(
        &self,
        state: &mut SessionState,
        buffer: AudioBuffer,
        voice_override: Option<&str>,
        speed_override: Option<f32>,
    ) -> Result<TurnOutcome> {
        let (recognizer, synthesizer) = self.speech_clients()?;
        let started = Instant::now();

        let recognition = recognizer.transcribe(buffer).await;
        if !recognition.is_usable() {
            tracing::warn!(failure = ?recognition.meta.failure, "recognition unusable, short-circuiting");
            return Ok(Self::retry_outcome(recognition.text));
        }
        let user_text = recognition.text;

        let mut outcome = self.respond_text(state, &user_text).await?;

        // Preference order: explicit override, then role, then configured default
        let voice = voice_override
            .or(self.role.tts.voice_type.as_deref())
            .map(str::to_string);
        let speed = speed_override.or(self.role.tts.speed_ratio);
        let synthesis = synthesizer
            .synthesize(&outcome.reply_text, voice.as_deref(), speed)
            .await;
        if let Some(failure) = &synthesis.meta.failure {
            tracing::warn!(failure, "voice turn proceeds without audio");
        }

        tracing::info!(
            recognition_ms = recognition.meta.elapsed_ms,
            synthesis_ms = synthesis.meta.elapsed_ms,
            total_ms = elapsed_ms(started),
            cache_hit = synthesis.meta.cache_hit,
            "voice turn"
        );

        outcome.recognized = Some(user_text);
        outcome.audio_path = synthesis.audio_path;
        Ok(outcome)
    }

    /// Sentence-streaming voice turn
    ///
    /// Spawns the turn and returns a receiver of [`TurnEvent`]s. The session
    /// is locked per unit and mutated only after that unit's reply text is
    /// finalized, so dropping the receiver cancels cleanly at a unit boundary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without speech clients attached.
    pub fn voice_sentence_stream(
        &self,
        state: Arc<Mutex<SessionState>>,
        buffer: AudioBuffer,
    ) -> Result<mpsc::Receiver<TurnEvent>> {
        self.speech_clients()?;
        let (tx, rx) = mpsc::channel(16);
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run_sentence_stream(state, buffer, &tx).await {
                tracing::error!(error = %e, "sentence stream aborted");
            }
            let _ = tx.send(TurnEvent::Done).await;
        });
        Ok(rx)
    }

    async fn run_sentence_stream(
        &self,
        state: Arc<Mutex<SessionState>>,
        buffer: AudioBuffer,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<()> {
        let (recognizer, synthesizer) = self.speech_clients()?;
        let started = Instant::now();

        if tx
            .send(TurnEvent::Status("正在识别…".to_string()))
            .await
            .is_err()
        {
            return Ok(());
        }

        let recognition = recognizer.transcribe(buffer).await;
        if !recognition.is_usable() {
            tracing::warn!(failure = ?recognition.meta.failure, "recognition unusable, short-circuiting");
            let _ = tx
                .send(TurnEvent::Unit {
                    index: 1,
                    total: 1,
                    user_text: String::new(),
                    reply_text: RETRY_PROMPT.to_string(),
                    audio_path: None,
                })
                .await;
            return Ok(());
        }
        let user_text = recognition.text;

        let units = split_for_tts(&user_text, self.config.max_reply_chars_voice);
        let total = units.len();
        if tx
            .send(TurnEvent::Recognized {
                text: user_text.clone(),
                units: total,
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        for (index, unit) in units.into_iter().enumerate() {
            let reply = {
                let mut session = state.lock().await;
                self.respond_short(&mut session, &unit).await?
            };

            if tx
                .send(TurnEvent::Status("正在合成…".to_string()))
                .await
                .is_err()
            {
                return Ok(());
            }

            let synthesis = synthesizer
                .synthesize(&reply, self.role.tts.voice_type.as_deref(), self.role.tts.speed_ratio)
                .await;
            if let Some(failure) = &synthesis.meta.failure {
                tracing::warn!(failure, index, "unit proceeds without audio");
            }

            if tx
                .send(TurnEvent::Unit {
                    index: index + 1,
                    total,
                    user_text: unit,
                    reply_text: reply,
                    audio_path: synthesis.audio_path,
                })
                .await
                .is_err()
            {
                return Ok(());
            }
        }

        tracing::info!(
            recognition_ms = recognition.meta.elapsed_ms,
            total_ms = elapsed_ms(started),
            units = total,
            "sentence stream done"
        );
        Ok(())
    }

    fn speech_clients(&self) -> Result<(&Recognizer, &SpeechSynthesizer)> {
        match (&self.recognizer, &self.synthesizer) {
            (Some(r), Some(s)) => Ok((r, s)),
            _ => Err(Error::Config(
                "speech clients not attached to pipeline".to_string(),
            )),
        }
    }

    fn retry_outcome(recognized: String) -> TurnOutcome {
        TurnOutcome {
            reply_text: RETRY_PROMPT.to_string(),
            skill: None,
            display_tag: None,
            route: RouteDecision {
                skill: SkillId::None,
                confidence: 0.0,
                debug: crate::dispatch::RouteDebug::default(),
            },
            recognized: Some(recognized),
            audio_path: None,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Build the role system prompt (tone, taboos, format preferences)
#[must_use]
pub fn build_system_prompt(role: &RoleConfig) -> String {
    let mut parts = vec![format!("你现在扮演：{}。风格：{}。", role.name, role.style)];
    if !role.mission.is_empty() {
        parts.push(format!("使命：{}。", role.mission));
    }
    if !role.persona.is_empty() {
        parts.push(format!("人设要点：{}", role.persona.join("；")));
    }
    if !role.taboos.is_empty() {
        parts.push(format!("避免输出：{}", role.taboos.join("；")));
    }
    if role.format_prefs.bullets {
        parts.push("如可，采用分点表达。".to_string());
    }
    if let Some(max_words) = role.format_prefs.max_words {
        parts.push(format!("尽量不超过 {max_words} 字。"));
    }
    parts.push("请使用中文回答。".to_string());
    parts.join(" ")
}

/// System prompt, bounded history, then the current utterance
#[must_use]
pub fn assemble_messages(system_prompt: &str, history: &[Message], user_text: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);
    messages.push(Message::user(user_text));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::FormatPrefs;
    use crate::session::Role;

    #[test]
    fn system_prompt_reflects_role_fields() {
        let role = RoleConfig {
            name: "苏格拉底".to_string(),
            style: "犀利".to_string(),
            persona: vec!["爱提问".to_string()],
            taboos: vec!["人身攻击".to_string()],
            format_prefs: FormatPrefs {
                bullets: true,
                max_words: Some(100),
            },
            mission: "帮助用户思考".to_string(),
            ..RoleConfig::default()
        };
        let prompt = build_system_prompt(&role);
        assert!(prompt.contains("苏格拉底"));
        assert!(prompt.contains("犀利"));
        assert!(prompt.contains("爱提问"));
        assert!(prompt.contains("避免输出：人身攻击"));
        assert!(prompt.contains("分点表达"));
        assert!(prompt.contains("100"));
        assert!(prompt.ends_with("请使用中文回答。"));
    }

    #[test]
    fn minimal_role_prompt_skips_empty_sections() {
        let prompt = build_system_prompt(&RoleConfig::default());
        assert!(!prompt.contains("人设要点"));
        assert!(!prompt.contains("避免输出"));
        assert!(prompt.contains("请使用中文回答。"));
    }

    #[test]
    fn messages_ordered_system_history_user() {
        let history = [Message::user("a"), Message::assistant("b")];
        let messages = assemble_messages("sys", &history, "c");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "a");
        assert_eq!(messages[2].content, "b");
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "c");
    }
}
