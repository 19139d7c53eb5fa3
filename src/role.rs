//! Role (persona) configuration
//!
//! Loaded from JSON files, validated by serde at load time, read-only to the
//! core afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Output formatting preferences for a role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatPrefs {
    /// Prefer bulleted answers
    #[serde(default)]
    pub bullets: bool,

    /// Soft cap on reply length in characters
    #[serde(default)]
    pub max_words: Option<usize>,
}

/// Voice preferences for a role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleTts {
    /// Preferred voice identifier
    #[serde(default)]
    pub voice_type: Option<String>,

    /// Preferred speed ratio
    #[serde(default)]
    pub speed_ratio: Option<f32>,
}

/// A conversational role: tone, persona lines, taboos, mission, voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Display name
    pub name: String,

    /// Speaking style, e.g. "中性、克制"
    pub style: String,

    /// Persona bullet points
    #[serde(default)]
    pub persona: Vec<String>,

    /// Signature phrases the role may open with
    #[serde(default)]
    pub catchphrases: Vec<String>,

    /// Topics the role must not produce
    #[serde(default)]
    pub taboos: Vec<String>,

    /// Formatting preferences
    #[serde(default)]
    pub format_prefs: FormatPrefs,

    /// Mission statement framing every reply
    #[serde(default)]
    pub mission: String,

    /// Voice preferences
    #[serde(default)]
    pub tts: RoleTts,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            style: "中性、克制".to_string(),
            persona: Vec::new(),
            catchphrases: Vec::new(),
            taboos: Vec::new(),
            format_prefs: FormatPrefs::default(),
            mission: "对话助手".to_string(),
            tts: RoleTts::default(),
        }
    }
}

impl RoleConfig {
    /// Load one role from a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Role`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Role(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Role(format!("parse {}: {e}", path.display())))
    }
}

/// Load every `*.json` role in a directory, keyed by role name
///
/// An empty or missing directory yields the default role so the gateway can
/// always start.
///
/// # Errors
///
/// Returns [`Error::Role`] if a present file fails to parse.
pub fn load_all(dir: &Path) -> Result<BTreeMap<String, RoleConfig>> {
    let mut out = BTreeMap::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let role = RoleConfig::from_file(&path)?;
                out.insert(role.name.clone(), role);
            }
        }
    }
    if out.is_empty() {
        let role = RoleConfig::default();
        out.insert(role.name.clone(), role);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_role_parses_with_defaults() {
        let role: RoleConfig =
            serde_json::from_str(r#"{"name": "苏格拉底", "style": "追问、犀利"}"#).unwrap();
        assert_eq!(role.name, "苏格拉底");
        assert!(role.persona.is_empty());
        assert!(role.tts.voice_type.is_none());
    }

    #[test]
    fn full_role_round_trips() {
        let json = r#"{
            "name": "Luma",
            "style": "温暖",
            "persona": ["倾听者"],
            "taboos": ["医疗建议"],
            "format_prefs": {"bullets": true, "max_words": 120},
            "mission": "陪伴",
            "tts": {"voice_type": "qiniu_zh_female_xyqxxj", "speed_ratio": 1.1}
        }"#;
        let role: RoleConfig = serde_json::from_str(json).unwrap();
        assert!(role.format_prefs.bullets);
        assert_eq!(role.format_prefs.max_words, Some(120));
        assert_eq!(role.tts.speed_ratio, Some(1.1));
    }

    #[test]
    fn empty_dir_yields_default_role() {
        let dir = tempfile::tempdir().unwrap();
        let roles = load_all(dir.path()).unwrap();
        assert!(roles.contains_key("Default"));
    }
}
