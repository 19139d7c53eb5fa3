//! Counterfactual: rerun the argument under changed premises

use async_trait::async_trait;

use crate::dispatch::SkillId;
use crate::llm::ChatCompleter;
use crate::role::RoleConfig;
use crate::session::Message;
use crate::Result;

use super::{style_hint, Skill, SkillOutput};

pub struct Counterfactual;

#[async_trait]
impl Skill for Counterfactual {
    fn id(&self) -> SkillId {
        SkillId::Counterfactual
    }

    fn display_tag(&self) -> &'static str {
        "反事实推演（Counterfactual）"
    }

    async fn run(
        &self,
        user_text: &str,
        role: &RoleConfig,
        _history: &[Message],
        llm: &dyn ChatCompleter,
    ) -> Result<SkillOutput> {
        let mut sys = String::from(
            "你是\u{201c}反事实推演\u{201d}分析师。用中文，找出用户论证依赖的关键假设，\
             将其反转或替换后推演结果。\
             输出严格三段：\n\
             【关键假设】：（1-2条）\n\
             【反事实情形】：（假设变化后会发生什么）\n\
             【对原结论的影响】：（加强/削弱/不变，说明理由）\n\
             要求：推演链条清晰，避免空泛。",
        );
        let hint = style_hint(role);
        if !hint.is_empty() {
            sys.push(' ');
            sys.push_str(&hint);
        }
        let messages = [
            Message::system(sys),
            Message::user(format!("待推演的论证：{user_text}")),
        ];
        let reply = llm.complete(&messages, 450, false).await?;
        Ok(SkillOutput {
            skill: self.id(),
            display_tag: self.display_tag(),
            reply_text: reply,
        })
    }
}
