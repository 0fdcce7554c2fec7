//! Serde shapes of the ruleset document.
//!
//! Everything is parsed per entry so one bad rule, override or action is
//! reported and skipped without rejecting its siblings.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value as Json;

use crate::action::parameter_string;

/// Accept ids written as strings or numbers (`"id": 1`).
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Json::deserialize(d)? {
        Json::String(s) => Ok(s),
        Json::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("invalid id: {other}"))),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    id_string(d).map(Some)
}

/// `enabled` appears both as a bool and as `"true"`/`"false"`.
fn flexible_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Json::deserialize(d)? {
        Json::Bool(b) => Ok(Some(b)),
        Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        other => Err(D::Error::custom(format!("invalid boolean: {other}"))),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RuleDef {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tags: BTreeMap<String, Json>,
    pub conditions: Vec<ConditionDef>,
    #[serde(default)]
    pub on_match: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleDef {
    pub fn string_tags(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|(k, v)| (k.clone(), parameter_string(v)))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConditionDef {
    pub operator: String,
    pub parameters: ParametersDef,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ParametersDef {
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    pub regex: Option<String>,
    #[serde(default)]
    pub options: RegexOptions,
    pub list: Option<Vec<String>>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RegexOptions {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub min_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InputDef {
    pub address: String,
    #[serde(default)]
    pub key_path: Vec<Json>,
}

impl InputDef {
    pub fn key_path_strings(&self) -> Vec<String> {
        self.key_path.iter().map(parameter_string).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TargetDef {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, Json>,
}

impl TargetDef {
    pub fn matches(&self, rule_id: &str, rule_tags: &BTreeMap<String, String>) -> bool {
        if let Some(id) = &self.rule_id {
            return id == rule_id;
        }
        !self.tags.is_empty()
            && self
                .tags
                .iter()
                .all(|(k, v)| rule_tags.get(k).is_some_and(|t| *t == parameter_string(v)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OverrideDef {
    #[serde(default)]
    pub rules_target: Vec<TargetDef>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub enabled: Option<bool>,
    pub on_match: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExclusionDef {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub rules_target: Vec<TargetDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ActionDef {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Json>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RuleDataDef {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub data: Vec<DataEntryDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DataEntryDef {
    pub value: String,
    pub expiration: Option<Json>,
}

/// Entry id for diagnostics, even when the entry itself fails to parse.
pub(crate) fn raw_id(raw: &Json) -> String {
    raw.get("id")
        .map(parameter_string)
        .unwrap_or_else(|| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_and_string_booleans_are_accepted() {
        let exclusion: ExclusionDef =
            serde_json::from_value(json!({"id": 1, "rules_target": [{"rule_id": 1}]})).unwrap();
        assert_eq!(exclusion.id.as_deref(), Some("1"));
        assert_eq!(exclusion.rules_target[0].rule_id.as_deref(), Some("1"));

        let ovr: OverrideDef =
            serde_json::from_value(json!({"rules_target": [{"rule_id": "1"}], "enabled": "false"})).unwrap();
        assert_eq!(ovr.enabled, Some(false));

        let bad = serde_json::from_value::<OverrideDef>(json!({"enabled": "maybe"}));
        assert!(bad.is_err());
    }

    #[test]
    fn tag_targets_need_every_tag_to_match() {
        let tags: BTreeMap<String, String> = [("type", "flow1"), ("category", "c1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let target: TargetDef = serde_json::from_value(json!({"tags": {"type": "flow1"}})).unwrap();
        assert!(target.matches("1", &tags));

        let target: TargetDef =
            serde_json::from_value(json!({"tags": {"type": "flow1", "category": "other"}})).unwrap();
        assert!(!target.matches("1", &tags));

        assert!(!TargetDef::default().matches("1", &tags));
    }
}
