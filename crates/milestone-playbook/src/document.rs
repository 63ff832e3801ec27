use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locale code → text, e.g. `{"ru": "...", "en": "..."}`.
pub type LocalizedText = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDocument {
    pub playbook_id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale_default: Option<String>,
    pub worlds: Vec<WorldDoc>,
    #[serde(default)]
    pub roles: Vec<RoleDoc>,
    #[serde(default)]
    pub conditions: Vec<ConditionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDoc {
    pub id: String,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub id: String,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub who_can_complete: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<OutcomeDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<RequirementsDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDoc {
    pub value: String,
    #[serde(default)]
    pub label: LocalizedText,
    /// Explicit match expression. Without it the outcome matches when the
    /// node's own `outcome` field equals `value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub next: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerDoc {
    pub duration_days: u32,
    #[serde(default = "default_start_on")]
    pub start_on: String,
}

fn default_start_on() -> String {
    "node_active".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementsDoc {
    #[serde(default)]
    pub fields: Vec<FieldDoc>,
    #[serde(default)]
    pub uploads: Vec<UploadDoc>,
    #[serde(default)]
    pub validations: Vec<ValidationDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
    #[serde(default)]
    pub checklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDoc {
    pub key: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub label: LocalizedText,
    #[serde(default)]
    pub options: Vec<OptionDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDoc {
    pub value: String,
    #[serde(default)]
    pub label: LocalizedText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadDoc {
    pub key: String,
    #[serde(default)]
    pub mime: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub label: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDoc {
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDoc {
    pub id: String,
    #[serde(default)]
    pub label: LocalizedText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDoc {
    pub id: String,
    pub expr: String,
    #[serde(default)]
    pub description: LocalizedText,
}

const LOCALE_FALLBACKS: &[&str] = &["en", "ru", "kz"];

/// Pick the text for `locale`, falling back to en/ru/kz and then any entry.
pub fn pick_locale<'a>(text: &'a LocalizedText, locale: &str) -> Option<&'a str> {
    text.get(locale)
        .or_else(|| LOCALE_FALLBACKS.iter().find_map(|l| text.get(*l)))
        .or_else(|| text.values().next())
        .map(String::as_str)
}
