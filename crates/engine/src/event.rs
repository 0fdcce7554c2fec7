use serde::Serialize;

use crate::action::{Action, ActionType};

/// Result of one publish call.
///
/// `triggers` holds serialized match records in the order listeners emitted
/// them; `actions` follows detector registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Event {
    pub triggers: Vec<String>,
    pub actions: Vec<Action>,
    pub force_keep: bool,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.actions.is_empty()
    }

    pub fn has_action(&self, action_type: ActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }

    /// First action of the given type, if any.
    pub fn action(&self, action_type: ActionType) -> Option<&Action> {
        self.actions.iter().find(|a| a.action_type == action_type)
    }
}
