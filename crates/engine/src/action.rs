//! Enforcement actions and the per-engine table of their default parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Block,
    Redirect,
    Record,
    StackTrace,
    ExtractSchema,
}

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::Block,
        ActionType::Redirect,
        ActionType::Record,
        ActionType::StackTrace,
        ActionType::ExtractSchema,
    ];

    /// Canonical name, also used as the id of the builtin action.
    pub fn name(self) -> &'static str {
        match self {
            ActionType::Block => "block",
            ActionType::Redirect => "redirect",
            ActionType::Record => "record",
            ActionType::StackTrace => "stack_trace",
            ActionType::ExtractSchema => "extract_schema",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Map the action type reported by a matcher (`block_request`, ...).
    /// Anything unknown is `None` and must never reach an event.
    pub fn from_matcher_type(kind: &str) -> Option<Self> {
        match kind {
            "block_request" => Some(ActionType::Block),
            "redirect_request" => Some(ActionType::Redirect),
            "generate_stack" => Some(ActionType::StackTrace),
            "generate_schema" => Some(ActionType::ExtractSchema),
            _ => None,
        }
    }

    /// Inverse of [`ActionType::from_matcher_type`]; `record` has no matcher form.
    pub fn matcher_type(self) -> Option<&'static str> {
        match self {
            ActionType::Block => Some("block_request"),
            ActionType::Redirect => Some("redirect_request"),
            ActionType::StackTrace => Some("generate_stack"),
            ActionType::ExtractSchema => Some("generate_schema"),
            ActionType::Record => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type ActionParameters = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: ActionParameters,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            parameters: ActionParameters::new(),
        }
    }

    pub fn with_parameters(action_type: ActionType, parameters: ActionParameters) -> Self {
        Self {
            action_type,
            parameters,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Render a JSON value as an action parameter string (`123` → `"123"`).
pub fn parameter_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// Stringify every member of a JSON `parameters` object.
pub fn parameters_from_json(value: Option<&Json>) -> ActionParameters {
    value
        .and_then(Json::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), parameter_string(v)))
                .collect()
        })
        .unwrap_or_default()
}

// ── Default parameter table ─────────────────────────────────────────

/// Default parameters per action type, consulted when an event is
/// materialized. Explicit parameters on an action always win.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTable {
    defaults: BTreeMap<ActionType, ActionParameters>,
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ActionTable {
    pub fn builtin() -> Self {
        let params = |pairs: &[(&str, &str)]| -> ActionParameters {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        let mut defaults = BTreeMap::new();
        defaults.insert(
            ActionType::Block,
            params(&[("status_code", "403"), ("grpc_status_code", "10"), ("type", "auto")]),
        );
        defaults.insert(ActionType::Redirect, params(&[("status_code", "303")]));
        defaults.insert(ActionType::Record, ActionParameters::new());
        defaults.insert(ActionType::StackTrace, ActionParameters::new());
        defaults.insert(ActionType::ExtractSchema, ActionParameters::new());
        Self { defaults }
    }

    /// Builtin defaults, overridden by `actions` entries whose `id` names a
    /// canonical action and whose `type` maps to that same action.
    pub fn from_config(actions: Option<&Json>) -> Self {
        let mut table = Self::builtin();
        let Some(entries) = actions.and_then(Json::as_array) else {
            return table;
        };

        for entry in entries {
            let id = entry.get("id").and_then(Json::as_str).unwrap_or_default();
            let kind = entry.get("type").and_then(Json::as_str).unwrap_or_default();
            let (Some(by_id), Some(by_type)) =
                (ActionType::from_name(id), ActionType::from_matcher_type(kind))
            else {
                continue;
            };
            if by_id != by_type {
                debug!(id, kind, "action override type does not match its id, ignoring");
                continue;
            }
            let slot = table.defaults.entry(by_id).or_default();
            slot.extend(parameters_from_json(entry.get("parameters")));
        }
        table
    }

    pub fn defaults(&self, action_type: ActionType) -> Option<&ActionParameters> {
        self.defaults.get(&action_type)
    }

    /// Fill in any parameter the action does not set explicitly.
    pub fn resolve(&self, action: &mut Action) {
        if let Some(defaults) = self.defaults.get(&action.action_type) {
            for (k, v) in defaults {
                action
                    .parameters
                    .entry(k.clone())
                    .or_insert_with(|| v.clone());
            }
        }
    }
}
