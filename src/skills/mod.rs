//! Debate-practice skills
//!
//! A skill is a prompt-construction strategy over the shared completion
//! client: it owns its system prompt and output contract, takes the role
//! for style hints, and returns tagged reply text. The dispatcher decides
//! *which* skill runs; skills never route.

pub mod counterfactual;
pub mod steelman;
pub mod x_exam;

use async_trait::async_trait;

use crate::dispatch::SkillId;
use crate::llm::ChatCompleter;
use crate::role::RoleConfig;
use crate::session::Message;
use crate::Result;

/// A skill's tagged reply
#[derive(Debug, Clone)]
pub struct SkillOutput {
    /// Wire identifier of the skill that produced this
    pub skill: SkillId,
    /// Display tag prepended in UIs, e.g. "强化论证（Steelman）"
    pub display_tag: &'static str,
    /// The reply text
    pub reply_text: String,
}

/// A prompt-construction strategy invoked by the dispatcher
#[async_trait]
pub trait Skill: Send + Sync {
    /// Wire identifier
    fn id(&self) -> SkillId;

    /// Display tag for UIs and logs
    fn display_tag(&self) -> &'static str;

    /// Run the skill for one utterance
    async fn run(
        &self,
        user_text: &str,
        role: &RoleConfig,
        history: &[Message],
        llm: &dyn ChatCompleter,
    ) -> Result<SkillOutput>;
}

/// Look up the skill for a routed decision
///
/// [`SkillId::None`] has no skill; generic conversation handles it.
#[must_use]
pub fn lookup(id: SkillId) -> Option<Box<dyn Skill>> {
    match id {
        SkillId::Steelman => Some(Box::new(steelman::Steelman)),
        SkillId::XExam => Some(Box::new(x_exam::XExam)),
        SkillId::Counterfactual => Some(Box::new(counterfactual::Counterfactual)),
        SkillId::None => None,
    }
}

/// A terse role style hint appended to skill system prompts
pub(crate) fn style_hint(role: &RoleConfig) -> String {
    let mut hints = Vec::new();
    if !role.style.is_empty() {
        hints.push(format!("保持{}风格", role.style));
    }
    if !role.mission.is_empty() {
        hints.push(format!("遵循使命：{}", role.mission));
    }
    if let Some(first) = role.catchphrases.first() {
        hints.push(format!("可酌情用其口头禅开场：{first}"));
    }
    hints.join("；")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_covers_every_skill() {
        for id in [SkillId::Steelman, SkillId::XExam, SkillId::Counterfactual] {
            let skill = lookup(id).unwrap();
            assert_eq!(skill.id(), id);
            assert!(!skill.display_tag().is_empty());
        }
        assert!(lookup(SkillId::None).is_none());
    }

    #[test]
    fn style_hint_follows_role_fields() {
        let mut role = RoleConfig::default();
        role.catchphrases.push("说来听听。".to_string());
        let hint = style_hint(&role);
        assert!(hint.contains("中性、克制"));
        assert!(hint.contains("说来听听。"));

        let bare = RoleConfig {
            style: String::new(),
            mission: String::new(),
            catchphrases: Vec::new(),
            ..RoleConfig::default()
        };
        assert!(style_hint(&bare).is_empty());
    }
}
