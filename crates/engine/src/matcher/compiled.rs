//! The builtin [`RuleMatcher`]: ruleset compilation and evaluation.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as Json};
use tracing::{debug, info};

use appsec_core::{AppsecError, Result, Value, ValueView};

use crate::action::{parameter_string, ActionParameters, ActionType};

use super::operator::Operator;
use super::rule_data::{build_tables, RuleData};
use super::ruleset::{raw_id, ActionDef, ExclusionDef, OverrideDef, RuleDef};
use super::{
    ConditionMatch, Deadline, Diagnostics, MatchOutcome, Matcher, ReportedAction, RuleMatch,
};

/// Nesting limit when scanning request values.
const MAX_DEPTH: usize = 20;

// ── Ruleset sections ────────────────────────────────────────────────

/// One layer of ruleset content.
#[derive(Debug, Clone, Default)]
struct Sections {
    rules: Vec<Json>,
    custom_rules: Vec<Json>,
    rules_override: Vec<Json>,
    exclusions: Vec<Json>,
    actions: Vec<Json>,
    rules_data: Vec<Json>,
}

fn array_section(value: &Json, key: &str) -> Result<Vec<Json>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| AppsecError::invalid_config(format!("{key} must be an array")))
}

fn optional_section(doc: &JsonMap<String, Json>, key: &str) -> Result<Vec<Json>> {
    doc.get(key)
        .map(|v| array_section(v, key))
        .transpose()
        .map(Option::unwrap_or_default)
}

impl Sections {
    /// Everything except `rules`; absent keys become empty.
    fn dynamic_from(doc: &JsonMap<String, Json>) -> Result<Self> {
        Ok(Self {
            rules: Vec::new(),
            custom_rules: optional_section(doc, "custom_rules")?,
            rules_override: optional_section(doc, "rules_override")?,
            exclusions: optional_section(doc, "exclusions")?,
            actions: optional_section(doc, "actions")?,
            rules_data: optional_section(doc, "rules_data")?,
        })
    }
}

fn as_object(doc: &Json) -> Result<&JsonMap<String, Json>> {
    doc.as_object()
        .ok_or_else(|| AppsecError::invalid_config("ruleset must be a JSON object"))
}

fn rules_version_of(doc: &JsonMap<String, Json>) -> Option<String> {
    doc.get("metadata")
        .and_then(|m| m.get("rules_version"))
        .and_then(Json::as_str)
        .map(str::to_string)
}

// ── Compiled rules ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Input {
    address: String,
    key_path: Vec<String>,
}

#[derive(Debug, Clone)]
struct Condition {
    operator: Operator,
    inputs: Vec<Input>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    id: String,
    name: String,
    tags: BTreeMap<String, String>,
    conditions: Vec<Condition>,
    on_match: Vec<String>,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct ActionSpec {
    kind: String,
    parameters: ActionParameters,
}

impl CompiledRule {
    fn parse(raw: &Json) -> std::result::Result<Self, String> {
        let def: RuleDef = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        if !def.tags.contains_key("type") {
            return Err("missing key 'type'".to_string());
        }
        if def.conditions.is_empty() {
            return Err("missing key 'conditions'".to_string());
        }

        let conditions = def
            .conditions
            .iter()
            .map(|c| {
                if c.parameters.inputs.is_empty() {
                    return Err("missing key 'inputs'".to_string());
                }
                Ok(Condition {
                    operator: Operator::parse(&c.operator, &c.parameters)?,
                    inputs: c
                        .parameters
                        .inputs
                        .iter()
                        .map(|i| Input {
                            address: i.address.clone(),
                            key_path: i.key_path_strings(),
                        })
                        .collect(),
                })
            })
            .collect::<std::result::Result<Vec<_>, String>>()?;

        Ok(Self {
            tags: def.string_tags(),
            id: def.id,
            name: def.name,
            conditions,
            on_match: def.on_match,
            enabled: def.enabled,
        })
    }

    /// Every condition must match; returns one record per condition.
    fn evaluate(
        &self,
        data: ValueView<'_>,
        tables: &HashMap<String, RuleData>,
        now: u64,
    ) -> Option<Vec<ConditionMatch>> {
        self.conditions
            .iter()
            .map(|c| c.evaluate(data, tables, now))
            .collect()
    }
}

impl Condition {
    fn evaluate(
        &self,
        data: ValueView<'_>,
        tables: &HashMap<String, RuleData>,
        now: u64,
    ) -> Option<ConditionMatch> {
        for input in &self.inputs {
            let Some(root) = resolve(data, input) else {
                continue;
            };
            let mut path = input.key_path.clone();
            if let Some((value, highlight, key_path)) =
                scan(root, &self.operator, tables, now, &mut path, 0)
            {
                return Some(ConditionMatch {
                    operator: self.operator.name().to_string(),
                    operator_value: self.operator.value().to_string(),
                    address: input.address.clone(),
                    key_path,
                    value,
                    highlight,
                });
            }
        }
        None
    }
}

/// Follow an input's address and key path into the request data.
fn resolve<'a>(data: ValueView<'a>, input: &Input) -> Option<ValueView<'a>> {
    let mut current = data.get(&input.address)?;
    for segment in &input.key_path {
        current = match current.value() {
            Value::Map(_) => current.get(segment)?,
            Value::Array(_) => current.at(segment.parse().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Int(i) => Some(Cow::Owned(i.to_string())),
        Value::Uint(u) => Some(Cow::Owned(u.to_string())),
        Value::Float(f) => Some(Cow::Owned(f.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Depth-first search for the first scalar the operator accepts.
/// Returns `(value, highlight, key_path)`.
fn scan(
    view: ValueView<'_>,
    operator: &Operator,
    tables: &HashMap<String, RuleData>,
    now: u64,
    path: &mut Vec<String>,
    depth: usize,
) -> Option<(String, String, Vec<String>)> {
    if depth > MAX_DEPTH {
        return None;
    }
    match view.value() {
        Value::Map(_) => {
            for (key, child) in view.entries() {
                path.push(key.to_string());
                let found = scan(child, operator, tables, now, path, depth + 1);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(i.to_string());
                let found = scan(ValueView::new(item), operator, tables, now, path, depth + 1);
                path.pop();
                if found.is_some() {
                    return found;
                }
            }
            None
        }
        scalar => {
            let candidate = scalar_text(scalar)?;
            let highlight = operator.matches(&candidate, tables, now)?;
            Some((candidate.into_owned(), highlight, path.clone()))
        }
    }
}

fn builtin_actions() -> HashMap<String, ActionSpec> {
    let mut actions = HashMap::new();
    for action_type in [ActionType::Block, ActionType::StackTrace, ActionType::ExtractSchema] {
        let Some(kind) = action_type.matcher_type() else {
            continue;
        };
        let parameters = if action_type == ActionType::Block {
            [("status_code", "403"), ("grpc_status_code", "10"), ("type", "auto")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        } else {
            ActionParameters::new()
        };
        actions.insert(
            action_type.name().to_string(),
            ActionSpec {
                kind: kind.to_string(),
                parameters,
            },
        );
    }
    actions
}

// ── Matcher ─────────────────────────────────────────────────────────

/// Builtin ruleset evaluator.
///
/// Content comes in two layers. The base layer is the ruleset the matcher
/// was built from; an update carrying `rules` replaces its rules. The remote
/// layer holds `custom_rules`, `rules_override`, `exclusions`, `actions` and
/// `rules_data` from the latest update, each replaced when present and
/// cleared when absent. Evaluation sees base followed by remote.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules_version: String,
    base: Sections,
    remote: Sections,
    rules: Vec<CompiledRule>,
    actions: HashMap<String, ActionSpec>,
    data: HashMap<String, RuleData>,
    addresses: BTreeSet<String>,
}

impl RuleMatcher {
    pub fn from_json(ruleset: &Json) -> Result<(Self, Diagnostics)> {
        let doc = as_object(ruleset)?;
        let mut base = Sections::dynamic_from(doc)?;
        base.rules = optional_section(doc, "rules")?;
        let version = rules_version_of(doc).unwrap_or_default();
        Self::compile(version, base, Sections::default())
    }

    pub fn from_json_str(ruleset: &str) -> Result<(Self, Diagnostics)> {
        let json: Json = serde_json::from_str(ruleset)
            .map_err(|e| AppsecError::invalid_config(format!("invalid ruleset json: {e}")))?;
        Self::from_json(&json)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// `None` when no rule carries this id.
    pub fn is_rule_enabled(&self, id: &str) -> Option<bool> {
        self.rules.iter().find(|r| r.id == id).map(|r| r.enabled)
    }

    fn compile(rules_version: String, base: Sections, remote: Sections) -> Result<(Self, Diagnostics)> {
        let mut diag = Diagnostics {
            rules_version: rules_version.clone(),
            ..Default::default()
        };

        let mut rules: Vec<CompiledRule> = Vec::new();
        let mut seen = HashSet::new();
        let all_rules = base
            .rules
            .iter()
            .chain(&base.custom_rules)
            .chain(&remote.custom_rules);
        for raw in all_rules {
            match CompiledRule::parse(raw) {
                Ok(rule) if !seen.insert(rule.id.clone()) => {
                    diag.record_failure(&rule.id, format!("duplicate rule: {}", rule.id));
                }
                Ok(rule) => {
                    diag.loaded.push(rule.id.clone());
                    rules.push(rule);
                }
                Err(message) => diag.record_failure(&raw_id(raw), message),
            }
        }
        if rules.is_empty() {
            return Err(AppsecError::invalid_config(format!(
                "no valid rules in ruleset ({} failed)",
                diag.failed.len()
            )));
        }

        for raw in base.rules_override.iter().chain(&remote.rules_override) {
            let ovr: OverrideDef = match serde_json::from_value(raw.clone()) {
                Ok(ovr) => ovr,
                Err(e) => {
                    diag.record_error(&raw_id(raw), e.to_string());
                    continue;
                }
            };
            for rule in rules
                .iter_mut()
                .filter(|r| ovr.rules_target.iter().any(|t| t.matches(&r.id, &r.tags)))
            {
                if let Some(enabled) = ovr.enabled {
                    rule.enabled = enabled;
                }
                if let Some(on_match) = &ovr.on_match {
                    rule.on_match = on_match.clone();
                }
            }
        }

        for raw in base.exclusions.iter().chain(&remote.exclusions) {
            let exclusion: ExclusionDef = match serde_json::from_value(raw.clone()) {
                Ok(exclusion) => exclusion,
                Err(e) => {
                    diag.record_error(&raw_id(raw), e.to_string());
                    continue;
                }
            };
            let mut excluded = 0usize;
            for rule in rules.iter_mut() {
                let targeted = exclusion.rules_target.is_empty()
                    || exclusion
                        .rules_target
                        .iter()
                        .any(|t| t.matches(&rule.id, &rule.tags));
                if targeted {
                    rule.enabled = false;
                    excluded += 1;
                }
            }
            debug!(
                exclusion = exclusion.id.as_deref().unwrap_or("<anonymous>"),
                excluded, "exclusion applied"
            );
        }

        let mut actions = builtin_actions();
        for raw in base.actions.iter().chain(&remote.actions) {
            match serde_json::from_value::<ActionDef>(raw.clone()) {
                Ok(def) => {
                    let parameters = def
                        .parameters
                        .iter()
                        .map(|(k, v)| (k.clone(), parameter_string(v)))
                        .collect();
                    actions.insert(
                        def.id,
                        ActionSpec {
                            kind: def.kind,
                            parameters,
                        },
                    );
                }
                Err(e) => diag.record_error(&raw_id(raw), e.to_string()),
            }
        }

        let data_entries: Vec<Json> = base
            .rules_data
            .iter()
            .chain(&remote.rules_data)
            .cloned()
            .collect();
        let data = build_tables(&data_entries, &mut diag);

        let addresses = rules
            .iter()
            .filter(|r| r.enabled)
            .flat_map(|r| r.conditions.iter())
            .flat_map(|c| c.inputs.iter().map(|i| i.address.clone()))
            .collect();

        info!(
            loaded = diag.loaded.len(),
            failed = diag.failed.len(),
            version = %rules_version,
            "ruleset compiled"
        );

        Ok((
            Self {
                rules_version,
                base,
                remote,
                rules,
                actions,
                data,
                addresses,
            },
            diag,
        ))
    }
}

impl Matcher for RuleMatcher {
    fn addresses(&self) -> BTreeSet<String> {
        self.addresses.clone()
    }

    fn rules_version(&self) -> &str {
        &self.rules_version
    }

    fn evaluate(
        &self,
        data: ValueView<'_>,
        deadline: &Deadline,
        skip: &HashSet<String>,
    ) -> Result<MatchOutcome> {
        deadline.check()?;
        let now = chrono::Utc::now().timestamp().max(0) as u64;

        let mut outcome = MatchOutcome::default();
        let mut reported = HashSet::new();
        for rule in &self.rules {
            if !rule.enabled || skip.contains(&rule.id) {
                continue;
            }
            deadline.check()?;

            let Some(conditions) = rule.evaluate(data, &self.data, now) else {
                continue;
            };

            for action_id in &rule.on_match {
                if !reported.insert(action_id.as_str()) {
                    continue;
                }
                match self.actions.get(action_id) {
                    Some(spec) => outcome.actions.push(ReportedAction {
                        id: action_id.clone(),
                        kind: spec.kind.clone(),
                        parameters: spec.parameters.clone(),
                    }),
                    None => debug!(rule = %rule.id, action = %action_id, "unknown action id"),
                }
            }

            outcome.matches.push(RuleMatch {
                rule_id: rule.id.clone(),
                name: rule.name.clone(),
                tags: rule.tags.clone(),
                conditions,
            });
        }

        Ok(outcome)
    }

    fn update(&self, config: &Json) -> Result<(Arc<dyn Matcher>, Diagnostics)> {
        let doc = as_object(config)?;
        let mut base = self.base.clone();
        let mut version = self.rules_version.clone();
        if let Some(rules) = doc.get("rules") {
            base.rules = array_section(rules, "rules")?;
            if let Some(v) = rules_version_of(doc) {
                version = v;
            }
        }
        let remote = Sections::dynamic_from(doc)?;

        let (matcher, diag) = Self::compile(version, base, remote)?;
        Ok((Arc::new(matcher), diag))
    }
}
