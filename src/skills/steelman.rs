//! Steelman: strengthen an argument to its best version

use async_trait::async_trait;

use crate::dispatch::SkillId;
use crate::llm::ChatCompleter;
use crate::role::RoleConfig;
use crate::session::Message;
use crate::Result;

use super::{style_hint, Skill, SkillOutput};

pub struct Steelman;

#[async_trait]
impl Skill for Steelman {
    fn id(&self) -> SkillId {
        SkillId::Steelman
    }

    fn display_tag(&self) -> &'static str {
        "强化论证（Steelman）"
    }

    async fn run(
        &self,
        user_text: &str,
        role: &RoleConfig,
        _history: &[Message],
        llm: &dyn ChatCompleter,
    ) -> Result<SkillOutput> {
        let mut sys = String::from(
            "你是\u{201c}强化论证（Steelman）\u{201d}教练。用中文，帮用户把观点强化到\u{201c}最强版本\u{201d}。\
             输出严格三段：\n\
             【立场（最强表述）】：\n\
             【关键论据（3-4条）】：\n\
             【潜在反驳与预案（2-3条）】：\n\
             要求：精准、克制、可执行。",
        );
        let hint = style_hint(role);
        if !hint.is_empty() {
            sys.push(' ');
            sys.push_str(&hint);
        }
        let messages = [
            Message::system(sys),
            Message::user(format!("待强化的观点/命题：{user_text}")),
        ];
        let reply = llm.complete(&messages, 450, false).await?;
        Ok(SkillOutput {
            skill: self.id(),
            display_tag: self.display_tag(),
            reply_text: reply,
        })
    }
}
