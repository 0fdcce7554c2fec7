use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use appsec_core::{AppsecError, Result};

use crate::config::RemoteConfig;

use super::ConfigAggregator;

const SUPPORTED_TYPES: [&str; 2] = ["ip_with_expiration", "data_with_expiration"];

fn invalid(msg: &str) -> AppsecError {
    AppsecError::invalid_config(msg)
}

/// Absent expiration (never expires) wins, then `0`, then the latest.
fn merge_expiration(stored: Option<u64>, incoming: Option<u64>) -> Option<u64> {
    match (stored, incoming) {
        (None, _) | (_, None) => None,
        (Some(0), _) | (_, Some(0)) => Some(0),
        (Some(a), Some(b)) => Some(a.max(b)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleData {
    data_type: String,
    /// value -> expiration
    values: BTreeMap<String, Option<u64>>,
}

/// Merged rule data keyed by id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleDataTable {
    entries: BTreeMap<String, RuleData>,
}

#[derive(Serialize)]
struct RuleDataOut<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    data_type: &'a str,
    data: Vec<DataOut<'a>>,
}

#[derive(Serialize)]
struct DataOut<'a> {
    value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration: Option<u64>,
}

/// One validated `rules_data` entry.
struct ParsedEntry {
    id: String,
    data_type: String,
    values: Vec<(String, Option<u64>)>,
}

impl RuleDataTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stored expiration of `value` under `id`; the outer `None` means the
    /// value is unknown.
    pub fn expiration(&self, id: &str, value: &str) -> Option<Option<u64>> {
        self.entries.get(id)?.values.get(value).copied()
    }

    /// Validate the whole fragment, then merge it. Nothing is merged if any
    /// entry is malformed.
    pub fn extract(&mut self, doc: &Json) -> Result<()> {
        for entry in parse_rules_data(doc)? {
            if !SUPPORTED_TYPES.contains(&entry.data_type.as_str()) {
                debug!(id = %entry.id, data_type = %entry.data_type, "unsupported rule data type ignored");
                continue;
            }
            let slot = self.entries.entry(entry.id).or_insert_with(|| RuleData {
                data_type: entry.data_type,
                values: BTreeMap::new(),
            });
            for (value, expiration) in entry.values {
                slot.values
                    .entry(value)
                    .and_modify(|stored| *stored = merge_expiration(*stored, expiration))
                    .or_insert(expiration);
            }
        }
        Ok(())
    }

    /// Serialize as a `rules_data` array, dropping ids without values.
    pub fn to_json(&self) -> Json {
        let out: Vec<RuleDataOut<'_>> = self
            .entries
            .iter()
            .filter(|(_, rd)| !rd.values.is_empty())
            .map(|(id, rd)| RuleDataOut {
                id,
                data_type: &rd.data_type,
                data: rd
                    .values
                    .iter()
                    .map(|(value, expiration)| DataOut {
                        value,
                        expiration: *expiration,
                    })
                    .collect(),
            })
            .collect();
        serde_json::to_value(out).unwrap_or_else(|_| Json::Array(Vec::new()))
    }
}

fn parse_rules_data(doc: &Json) -> Result<Vec<ParsedEntry>> {
    let entries = doc
        .get("rules_data")
        .and_then(Json::as_array)
        .ok_or_else(|| invalid("Invalid config json contents: rules_data key missing or invalid"))?;

    entries.iter().map(parse_entry).collect()
}

fn parse_entry(entry: &Json) -> Result<ParsedEntry> {
    let entry = entry
        .as_object()
        .ok_or_else(|| invalid("Invalid config json contents: rules_data entry invalid"))?;

    let field_error =
        || invalid("Invalid config json contents: rules_data missing a field or field is invalid");
    let id = entry.get("id").and_then(Json::as_str).ok_or_else(field_error)?;
    let data_type = entry.get("type").and_then(Json::as_str).ok_or_else(field_error)?;
    let data = entry.get("data").and_then(Json::as_array).ok_or_else(field_error)?;

    let values = data.iter().map(parse_data).collect::<Result<Vec<_>>>()?;
    Ok(ParsedEntry {
        id: id.to_string(),
        data_type: data_type.to_string(),
        values,
    })
}

fn parse_data(data: &Json) -> Result<(String, Option<u64>)> {
    let data = data
        .as_object()
        .ok_or_else(|| invalid("Invalid config json contents: Entry on data not a valid object"))?;

    let expiration = match data.get("expiration") {
        None => None,
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| invalid("Invalid type for expiration entry"))?,
        ),
    };
    let value = data
        .get("value")
        .and_then(Json::as_str)
        .ok_or_else(|| invalid("Invalid value of data entry"))?;

    Ok((value.to_string(), expiration))
}

/// ASM_DATA aggregator over a [`RuleDataTable`].
#[derive(Debug, Default, Clone)]
pub struct AsmDataAggregator {
    table: RuleDataTable,
}

impl AsmDataAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &RuleDataTable {
        &self.table
    }
}

impl ConfigAggregator for AsmDataAggregator {
    fn init(&mut self) {
        self.table.clear();
    }

    fn add(&mut self, config: &RemoteConfig) -> Result<()> {
        let doc = config.read_json()?;
        self.table.extract(&doc)
    }

    fn aggregate(&self, doc: &mut Map<String, Json>) {
        doc.insert("rules_data".to_string(), self.table.to_json());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn asm_data(doc: Json) -> RemoteConfig {
        RemoteConfig::from_json_text("ASM_DATA", &doc.to_string())
    }

    fn aggregate(aggregator: &AsmDataAggregator) -> Json {
        let mut doc = Map::new();
        aggregator.aggregate(&mut doc);
        doc.remove("rules_data").unwrap()
    }

    fn expect_error(contents: &str, expected: &str) {
        let mut aggregator = AsmDataAggregator::new();
        let err = aggregator
            .add(&RemoteConfig::from_json_text("ASM_DATA", contents))
            .unwrap_err();
        assert!(
            err.to_string().starts_with(expected),
            "{contents}: got {err}"
        );
        assert!(aggregator.table().is_empty());
    }

    #[test]
    fn entries_are_sorted_and_absent_expiration_is_omitted() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id02", "type": "data_with_expiration", "data": [{"value": "user1"}]},
                {"id": "id01", "type": "ip_with_expiration",
                 "data": [{"value": "5.6.7.8", "expiration": 3657529743u64}, {"value": "1.2.3.4", "expiration": 11}]}
            ]})))
            .unwrap();

        assert_eq!(
            aggregate(&aggregator),
            json!([
                {"id": "id01", "type": "ip_with_expiration",
                 "data": [{"value": "1.2.3.4", "expiration": 11}, {"value": "5.6.7.8", "expiration": 3657529743u64}]},
                {"id": "id02", "type": "data_with_expiration", "data": [{"value": "user1"}]}
            ])
        );
    }

    #[test]
    fn first_type_wins_and_values_merge() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration", "data": [{"value": "1.2.3.4", "expiration": 11}]},
                {"id": "id01", "type": "data_with_expiration", "data": [{"value": "5.6.7.8", "expiration": 22}]}
            ]})))
            .unwrap();

        let out = aggregate(&aggregator);
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["type"], "ip_with_expiration");
        assert_eq!(out[0]["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_values_keep_the_latest_expiration() {
        let mut aggregator = AsmDataAggregator::new();
        for exp in [11, 33, 22] {
            aggregator
                .add(&asm_data(json!({"rules_data": [
                    {"id": "id01", "type": "ip_with_expiration", "data": [{"value": "1.2.3.4", "expiration": exp}]}
                ]})))
                .unwrap();
        }
        assert_eq!(aggregator.table().expiration("id01", "1.2.3.4"), Some(Some(33)));
    }

    #[test]
    fn serialized_table_extracts_to_the_same_table() {
        let fragments = [
            json!({"rules_data": [
                {"id": "blocked_ips", "type": "ip_with_expiration", "data": [
                    {"value": "1.2.3.4", "expiration": 11},
                    {"value": "5.6.7.8"}
                ]},
                {"id": "blocked_users", "type": "data_with_expiration", "data": [{"value": "user1", "expiration": 0}]}
            ]}),
            json!({"rules_data": [
                {"id": "blocked_ips", "type": "data_with_expiration", "data": [
                    {"value": "1.2.3.4", "expiration": 99},
                    {"value": "9.9.9.9", "expiration": u64::MAX}
                ]},
                {"id": "blocked_users", "type": "data_with_expiration", "data": [{"value": "user1", "expiration": 7}]}
            ]}),
        ];
        let mut original = RuleDataTable::default();
        for fragment in &fragments {
            original.extract(fragment).unwrap();
        }

        let text = json!({"rules_data": original.to_json()}).to_string();
        let mut restored = RuleDataTable::default();
        restored.extract(&serde_json::from_str(&text).unwrap()).unwrap();

        assert_eq!(restored, original);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.expiration("blocked_ips", "1.2.3.4"), Some(Some(99)));
        assert_eq!(restored.expiration("blocked_ips", "5.6.7.8"), Some(None));
        assert_eq!(restored.expiration("blocked_ips", "9.9.9.9"), Some(Some(u64::MAX)));
        assert_eq!(restored.expiration("blocked_users", "user1"), Some(Some(0)));
    }

    #[test]
    fn never_expiring_takes_priority() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration", "data": [
                    {"value": "1.2.3.4", "expiration": 11},
                    {"value": "1.2.3.4"},
                    {"value": "1.2.3.4", "expiration": u64::MAX}
                ]}
            ]})))
            .unwrap();
        assert_eq!(aggregator.table().expiration("id01", "1.2.3.4"), Some(None));
        assert_eq!(
            aggregate(&aggregator)[0]["data"],
            json!([{"value": "1.2.3.4"}])
        );
    }

    #[test]
    fn zero_expiration_beats_finite_values() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration",
                 "data": [{"value": "1.2.3.4", "expiration": 11}, {"value": "5.6.7.8", "expiration": 3657529743u64}]}
            ]})))
            .unwrap();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration",
                 "data": [{"value": "1.2.3.4", "expiration": 0}, {"value": "192.168.1.1", "expiration": 5}]}
            ]})))
            .unwrap();

        assert_eq!(
            aggregate(&aggregator)[0]["data"],
            json!([
                {"value": "1.2.3.4", "expiration": 0},
                {"value": "192.168.1.1", "expiration": 5},
                {"value": "5.6.7.8", "expiration": 3657529743u64}
            ])
        );
    }

    #[test]
    fn invalid_fragment_is_rejected_whole() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration", "data": [{"value": "1.2.3.4", "expiration": 11}]}
            ]})))
            .unwrap();
        let err = aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration", "data": [{"value": "1.2.3.5", "expiration": 11}]},
                {"type": "ip_with_expiration", "data": [{"value": "1.2.3.4", "expiration": 11111}]}
            ]})))
            .unwrap_err();
        assert!(err.to_string().contains("rules_data missing a field"));
        assert_eq!(aggregator.table().expiration("id01", "1.2.3.5"), None);
        assert_eq!(aggregator.table().expiration("id01", "1.2.3.4"), Some(Some(11)));
    }

    #[test]
    fn empty_and_unsupported_entries_are_dropped() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id00", "type": "ip_with_expiration", "data": []},
                {"id": "id01", "type": "cidr_with_expiration", "data": [{"value": "1.2.3.0/24", "expiration": 11}]},
                {"id": "id02", "type": "data_with_expiration", "data": [{"value": "user1"}]}
            ]})))
            .unwrap();

        let out = aggregate(&aggregator);
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["id"], "id02");
    }

    #[test]
    fn init_resets_the_table() {
        let mut aggregator = AsmDataAggregator::new();
        aggregator
            .add(&asm_data(json!({"rules_data": [
                {"id": "id01", "type": "ip_with_expiration", "data": [{"value": "1.2.3.4"}]}
            ]})))
            .unwrap();
        aggregator.init();
        assert_eq!(aggregate(&aggregator), json!([]));
    }

    #[test]
    fn error_messages_are_stable() {
        let mut bad_base64 = RemoteConfig::from_json_text("ASM_DATA", "{}");
        bad_base64.contents = "&&&".to_string();
        let err = AsmDataAggregator::new().add(&bad_base64).unwrap_err();
        assert_eq!(err.to_string(), "Invalid config contents");

        expect_error("InvalidJsonContent", "Invalid config contents");
        expect_error(
            r#"{"another_key": 1234}"#,
            "Invalid config json contents: rules_data key missing or invalid",
        );
        expect_error(
            r#"{"rules_data": 1234}"#,
            "Invalid config json contents: rules_data key missing or invalid",
        );
        expect_error(
            r#"{"rules_data": ["invalid"]}"#,
            "Invalid config json contents: rules_data entry invalid",
        );
        for entry in [
            r#"{"data": [], "type": "ip_with_expiration"}"#,
            r#"{"id": 1234, "data": [], "type": "ip_with_expiration"}"#,
            r#"{"id": "some_id", "data": []}"#,
            r#"{"id": "some_id", "data": [], "type": 1234}"#,
            r#"{"id": "some_id", "type": "ip_with_expiration"}"#,
            r#"{"id": "some_id", "data": 1234, "type": "ip_with_expiration"}"#,
        ] {
            expect_error(
                &format!(r#"{{"rules_data": [{entry}]}}"#),
                "Invalid config json contents: rules_data missing a field or field is invalid",
            );
        }
        expect_error(
            r#"{"rules_data": [{"data": ["invalid"], "id": "some_id", "type": "ip_with_expiration"}]}"#,
            "Invalid config json contents: Entry on data not a valid object",
        );
        expect_error(
            r#"{"rules_data": [{"data": [{"expiration": "invalid", "value": "1.2.3.4"}], "id": "some_id", "type": "data_with_expiration"}]}"#,
            "Invalid type for expiration entry",
        );
        expect_error(
            r#"{"rules_data": [{"data": [{"expiration": 1234}], "id": "some_id", "type": "data_with_expiration"}]}"#,
            "Invalid value of data entry",
        );
        expect_error(
            r#"{"rules_data": [{"data": [{"expiration": 1234, "value": 1234}], "id": "some_id", "type": "data_with_expiration"}]}"#,
            "Invalid value of data entry",
        );
    }
}
