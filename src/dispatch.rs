//! Intent dispatch: keyword rules first, classifier fallback
//!
//! Tier 1 scans a fixed ordered keyword table; the first set with any member
//! present as a case-insensitive substring wins without any external call.
//! Tier 2 asks the classifier for a weight per candidate skill, normalizes
//! the distribution, and takes the argmax against a confidence threshold.

use std::collections::HashMap;

use crate::llm::ChatCompleter;

/// The fixed skill candidate set, including the designated "none"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkillId {
    /// Strengthen an argument to its best version
    Steelman,
    /// Cross-examination: probe for holes
    XExam,
    /// Counterfactual reasoning under changed premises
    Counterfactual,
    /// No skill: fall back to generic conversation
    None,
}

impl SkillId {
    /// Candidates in enumeration order; argmax ties resolve to the earliest
    pub const CANDIDATES: [Self; 4] = [Self::Steelman, Self::XExam, Self::Counterfactual, Self::None];

    /// Wire identifier used in classifier prompts and payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Steelman => "steelman",
            Self::XExam => "x_exam",
            Self::Counterfactual => "counterfactual",
            Self::None => "none",
        }
    }

    /// Parse a wire identifier
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Self::CANDIDATES.into_iter().find(|c| c.as_str() == s)
    }

    /// One-line Chinese description injected into the classifier prompt
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Steelman => "当用户想让观点/立场更有说服力、表述更扎实、更强、更完整时。",
            Self::XExam => "当用户希望被挑错/交叉质询/找漏洞/被针对性提问时。",
            Self::Counterfactual => "当用户想要在关键假设变化下推演结果（如果不这样/反过来/换前提）。",
            Self::None => "以上皆不符合，或只是闲聊/无法判断。",
        }
    }
}

/// Keyword rule table: first matching set wins
const RULES: &[(&[&str], SkillId)] = &[
    (
        &["强化", "打磨", "完善", "更强", "steelman", "最佳表述", "最强论证"],
        SkillId::Steelman,
    ),
    (
        &["质询", "交叉", "挑错", "找漏洞", "反驳我", "问难", "质问"],
        SkillId::XExam,
    ),
    (
        &["反事实", "如果不", "若相反", "假如相反", "假设变化", "换个前提"],
        SkillId::Counterfactual,
    ),
];

/// How a routing decision was reached, for logging and UI debug panes
#[derive(Debug, Clone, Default)]
pub struct RouteDebug {
    /// A rule keyword matched
    pub rule_hit: bool,
    /// Classifier intent summary, when tier 2 ran
    pub intent: Option<String>,
    /// Normalized confidence distribution, when tier 2 ran
    pub distribution: Option<HashMap<String, f64>>,
}

/// The dispatcher's decision for one utterance
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Selected skill; [`SkillId::None`] means generic conversation
    pub skill: SkillId,
    /// Argmax confidence (1.0 for rule hits)
    pub confidence: f64,
    /// Provenance for logging
    pub debug: RouteDebug,
}

impl RouteDecision {
    /// Whether a skill (not "none") was selected
    #[must_use]
    pub fn is_skill(&self) -> bool {
        self.skill != SkillId::None
    }
}

/// Two-tier intent dispatcher
#[derive(Debug, Clone)]
pub struct IntentDispatcher {
    threshold: f64,
}

impl IntentDispatcher {
    /// Create a dispatcher with the given classifier confidence threshold
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Route an utterance to a skill or to generic conversation
    ///
    /// With no classifier supplied, only the rule tier runs.
    pub async fn route(
        &self,
        user_text: &str,
        classifier: Option<&dyn ChatCompleter>,
    ) -> RouteDecision {
        let text = user_text.trim().to_lowercase();

        for (keywords, skill) in RULES {
            if keywords.iter().any(|kw| text.contains(kw)) {
                tracing::debug!(skill = skill.as_str(), "rule tier hit");
                return RouteDecision {
                    skill: *skill,
                    confidence: 1.0,
                    debug: RouteDebug {
                        rule_hit: true,
                        ..RouteDebug::default()
                    },
                };
            }
        }

        let Some(classifier) = classifier else {
            return RouteDecision {
                skill: SkillId::None,
                confidence: 0.0,
                debug: RouteDebug::default(),
            };
        };

        let (intent, raw_weights) = match classifier.classify(user_text).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "classifier call failed; falling back to chat");
                return RouteDecision {
                    skill: SkillId::None,
                    confidence: 0.0,
                    debug: RouteDebug::default(),
                };
            }
        };

        let distribution = normalize_weights(&raw_weights);
        let (best, confidence) = argmax(&distribution);
        tracing::debug!(
            skill = best.as_str(),
            confidence,
            %intent,
            "classifier tier decision"
        );

        let debug = RouteDebug {
            rule_hit: false,
            intent: Some(intent),
            distribution: Some(
                distribution
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), *v))
                    .collect(),
            ),
        };

        if best == SkillId::None || confidence < self.threshold {
            RouteDecision {
                skill: SkillId::None,
                confidence,
                debug,
            }
        } else {
            RouteDecision {
                skill: best,
                confidence,
                debug,
            }
        }
    }
}

/// Normalize raw classifier weights into a distribution over all candidates
///
/// Missing, negative, or NaN weights coerce to 0. An all-zero sum collapses
/// to "none" with weight 1; otherwise every weight is divided by the sum.
#[must_use]
pub fn normalize_weights(raw: &HashMap<String, f64>) -> HashMap<SkillId, f64> {
    let mut weights: HashMap<SkillId, f64> = SkillId::CANDIDATES
        .into_iter()
        .map(|skill| {
            let v = raw.get(skill.as_str()).copied().unwrap_or(0.0);
            let v = if v.is_finite() && v > 0.0 { v } else { 0.0 };
            (skill, v)
        })
        .collect();
    let sum: f64 = weights.values().sum();
    if sum > 0.0 {
        for v in weights.values_mut() {
            *v /= sum;
        }
    } else {
        for (skill, v) in &mut weights {
            *v = if *skill == SkillId::None { 1.0 } else { 0.0 };
        }
    }
    weights
}

/// Stable argmax over the candidate enumeration order
fn argmax(distribution: &HashMap<SkillId, f64>) -> (SkillId, f64) {
    let mut best = SkillId::Steelman;
    let mut best_weight = f64::MIN;
    for skill in SkillId::CANDIDATES {
        let weight = distribution.get(&skill).copied().unwrap_or(0.0);
        if weight > best_weight {
            best = skill;
            best_weight = weight;
        }
    }
    (best, best_weight)
}
