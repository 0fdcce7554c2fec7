use serde_json::{Map, Value as Json};
use tracing::debug;

use appsec_core::{AppsecError, Result};

use crate::config::RemoteConfig;

use super::ConfigAggregator;

/// Keys owned by the ASM product, in processing order.
const KEYS: [&str; 4] = ["actions", "custom_rules", "exclusions", "rules_override"];

/// Accumulates overrides, exclusions, actions and custom rules verbatim.
#[derive(Debug, Default, Clone)]
pub struct AsmAggregator {
    actions: Vec<Json>,
    custom_rules: Vec<Json>,
    exclusions: Vec<Json>,
    rules_override: Vec<Json>,
}

impl AsmAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn accumulator(&mut self, key: &str) -> &mut Vec<Json> {
        match key {
            "actions" => &mut self.actions,
            "custom_rules" => &mut self.custom_rules,
            "exclusions" => &mut self.exclusions,
            _ => &mut self.rules_override,
        }
    }

    fn section(&self, key: &str) -> &[Json] {
        match key {
            "actions" => &self.actions,
            "custom_rules" => &self.custom_rules,
            "exclusions" => &self.exclusions,
            _ => &self.rules_override,
        }
    }

    pub fn is_empty(&self) -> bool {
        KEYS.iter().all(|key| self.section(key).is_empty())
    }
}

impl ConfigAggregator for AsmAggregator {
    fn init(&mut self) {
        *self = Self::default();
    }

    /// Keys are applied one at a time: a non-array key fails the call but
    /// keys processed before it stay applied.
    fn add(&mut self, config: &RemoteConfig) -> Result<()> {
        let doc = config.read_json()?;
        let Json::Object(doc) = doc else {
            return Err(AppsecError::invalid_config(
                "Invalid config json contents: expected an object",
            ));
        };

        for key in KEYS {
            let Some(section) = doc.get(key) else {
                continue;
            };
            let Json::Array(items) = section else {
                return Err(AppsecError::invalid_config(format!(
                    "Invalid config json contents: {key} key invalid"
                )));
            };
            self.accumulator(key).extend(items.iter().cloned());
            debug!(config = %config.id, key, count = items.len(), "asm fragment applied");
        }
        Ok(())
    }

    fn aggregate(&self, doc: &mut Map<String, Json>) {
        for key in KEYS {
            doc.insert(key.to_string(), Json::Array(self.section(key).to_vec()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm(json: &str) -> RemoteConfig {
        RemoteConfig::from_json_text("ASM", json)
    }

    fn sizes(aggregator: &AsmAggregator) -> [usize; 4] {
        let mut doc = Map::new();
        aggregator.aggregate(&mut doc);
        KEYS.map(|key| doc[key].as_array().map(Vec::len).unwrap_or(usize::MAX))
    }

    const OVERRIDE: &str = r#"{"rules_override": [{"rules_target": [{"tags": {"confidence": "1"}}], "on_match": ["block"]}]}"#;
    const EXCLUSION: &str = r#"{"exclusions":[{"id":1,"rules_target":[{"rule_id":1}]}]}"#;
    const ACTION: &str = r#"{"actions": [{"id": "redirect", "type": "redirect_request", "parameters": {"status_code": "303", "location": "localhost"}}]}"#;
    const CUSTOM_RULE: &str = r#"{"custom_rules":[{"id":"1","name":"custom_rule1","tags":{"type":"custom","category":"custom"},"conditions":[{"operator":"match_regex","parameters":{"inputs":[{"address":"arg3"}],"regex":"^custom.*"}}],"on_match":["block"]}]}"#;

    #[test]
    fn empty_generation_emits_four_empty_arrays() {
        let mut aggregator = AsmAggregator::new();
        aggregator.init();
        let mut doc = Map::new();
        doc.insert("actions".into(), serde_json::json!([1, 2]));
        aggregator.aggregate(&mut doc);
        assert_eq!(doc.len(), 4);
        assert_eq!(sizes(&aggregator), [0, 0, 0, 0]);
        assert_eq!(doc["actions"], serde_json::json!([]));
    }

    #[test]
    fn generations_are_independent() {
        let mut aggregator = AsmAggregator::new();
        aggregator.init();
        for fragment in [OVERRIDE, EXCLUSION, ACTION, CUSTOM_RULE] {
            aggregator.add(&asm(fragment)).unwrap();
        }
        assert_eq!(sizes(&aggregator), [1, 1, 1, 1]);

        aggregator.init();
        assert!(aggregator.is_empty());
        aggregator.add(&asm(ACTION)).unwrap();
        aggregator.add(&asm(ACTION)).unwrap();
        assert_eq!(sizes(&aggregator), [2, 0, 0, 0]);
    }

    #[test]
    fn elements_are_copied_verbatim() {
        let mut aggregator = AsmAggregator::new();
        aggregator.add(&asm(OVERRIDE)).unwrap();
        let mut doc = Map::new();
        aggregator.aggregate(&mut doc);
        assert_eq!(
            doc["rules_override"][0],
            serde_json::json!({"rules_target": [{"tags": {"confidence": "1"}}], "on_match": ["block"]})
        );
    }

    #[test]
    fn invalid_fragments_are_rejected() {
        let mut aggregator = AsmAggregator::new();
        for bad in ["", "{", "[]", r#"{"actions": {"id": "redirect"}}"#] {
            assert!(aggregator.add(&asm(bad)).is_err(), "{bad}");
        }
        let err = aggregator.add(&asm(r#"{"exclusions": 1}"#)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid config json contents: exclusions key invalid");
        assert!(aggregator.is_empty());
    }

    #[test]
    fn rejected_fragments_do_not_disturb_siblings() {
        let mut aggregator = AsmAggregator::new();
        aggregator.add(&asm(OVERRIDE)).unwrap();
        aggregator.add(&asm(EXCLUSION)).unwrap();
        assert!(aggregator.add(&asm(r#"{"actions": {"id": "redirect"}}"#)).is_err());
        aggregator.add(&asm(CUSTOM_RULE)).unwrap();
        assert_eq!(sizes(&aggregator), [0, 1, 1, 1]);
    }

    #[test]
    fn keys_before_an_invalid_one_stay_applied() {
        let mut aggregator = AsmAggregator::new();
        let mixed = r#"{"actions": [{"id": "a"}], "exclusions": {"id": 1}, "rules_override": [{"id": "o"}]}"#;
        assert!(aggregator.add(&asm(mixed)).is_err());
        assert_eq!(sizes(&aggregator), [1, 0, 0, 0]);

        aggregator.init();
        let mixed = r#"{"rules_override": [{"rules_target": []}], "actions": {"id": "redirect"}}"#;
        assert!(aggregator.add(&asm(mixed)).is_err());
        assert_eq!(sizes(&aggregator), [0, 0, 0, 0]);
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let mut aggregator = AsmAggregator::new();
        aggregator.add(&asm(r#"{"rules_data": [], "something": 1}"#)).unwrap();
        assert!(aggregator.is_empty());
    }
}
