//! Cross-examination: probe an argument for holes with pointed questions

use async_trait::async_trait;

use crate::dispatch::SkillId;
use crate::llm::ChatCompleter;
use crate::role::RoleConfig;
use crate::session::Message;
use crate::Result;

use super::{style_hint, Skill, SkillOutput};

pub struct XExam;

#[async_trait]
impl Skill for XExam {
    fn id(&self) -> SkillId {
        SkillId::XExam
    }

    fn display_tag(&self) -> &'static str {
        "交叉质询（Cross-Exam）"
    }

    async fn run(
        &self,
        user_text: &str,
        role: &RoleConfig,
        _history: &[Message],
        llm: &dyn ChatCompleter,
    ) -> Result<SkillOutput> {
        let mut sys = String::from(
            "你是\u{201c}交叉质询\u{201d}主持人。用中文，针对用户的论证提出2-3个递进式质询问题，\
             少给结论，多暴露薄弱环节。\
             输出严格两段：\n\
             【最薄弱的一环】：（一句话点出）\n\
             【质询问题（2-3条，按递进编号）】：\n\
             要求：问题具体、可回答、直指证据与推理链。",
        );
        let hint = style_hint(role);
        if !hint.is_empty() {
            sys.push(' ');
            sys.push_str(&hint);
        }
        let messages = [
            Message::system(sys),
            Message::user(format!("待质询的论证：{user_text}")),
        ];
        let reply = llm.complete(&messages, 450, false).await?;
        Ok(SkillOutput {
            skill: self.id(),
            display_tag: self.display_tag(),
            reply_text: reply,
        })
    }
}
