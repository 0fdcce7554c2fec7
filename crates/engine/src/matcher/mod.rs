//! Rule matching behind the [`Matcher`] trait.
//!
//! The WAF detector only talks to `dyn Matcher`, so the evaluation runtime is
//! pluggable. [`RuleMatcher`] is the builtin implementation: it understands
//! the JSON ruleset format (rules, custom rules, overrides, exclusions,
//! actions and rule data) with the `match_regex`, `phrase_match`,
//! `exact_match` and `ip_match` operators.

mod compiled;
mod operator;
mod rule_data;
mod ruleset;


use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as Json;

use appsec_core::{AppsecError, Result, ValueView};

use crate::action::ActionParameters;

pub use self::compiled::RuleMatcher;

/// Evaluation runtime consumed by the WAF detector.
pub trait Matcher: Send + Sync {
    /// Addresses referenced by enabled rules.
    fn addresses(&self) -> BTreeSet<String>;

    fn rules_version(&self) -> &str;

    /// Evaluate `data`, skipping rules listed in `skip`. Fails with
    /// `Timeout` once `deadline` passes; partial results are dropped.
    fn evaluate(
        &self,
        data: ValueView<'_>,
        deadline: &Deadline,
        skip: &HashSet<String>,
    ) -> Result<MatchOutcome>;

    /// Build a new matcher with `config` applied on top of this one.
    fn update(&self, config: &Json) -> Result<(Arc<dyn Matcher>, Diagnostics)>;
}

/// Evaluation budget, started at construction.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// Fails once the elapsed time reaches the budget; a zero budget always fails.
    pub fn check(&self) -> Result<()> {
        if self.start.elapsed() >= self.budget {
            return Err(AppsecError::Timeout(self.budget.as_micros() as u64));
        }
        Ok(())
    }
}

/// Load report produced whenever a ruleset is (re)built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub rules_version: String,
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
    /// Error message → occurrence count.
    pub errors: BTreeMap<String, u64>,
}

impl Diagnostics {
    pub fn record_error(&mut self, id: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(id, error = %message, "ruleset entry rejected");
        *self.errors.entry(message).or_default() += 1;
    }

    pub fn record_failure(&mut self, rule_id: &str, message: impl Into<String>) {
        self.failed.push(rule_id.to_string());
        self.record_error(rule_id, message);
    }

    pub fn errors_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionMatch {
    pub operator: String,
    pub operator_value: String,
    pub address: String,
    pub key_path: Vec<String>,
    pub value: String,
    pub highlight: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub conditions: Vec<ConditionMatch>,
}

/// An action as the matcher reports it: its id, raw type and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedAction {
    pub id: String,
    pub kind: String,
    pub parameters: ActionParameters,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub matches: Vec<RuleMatch>,
    pub actions: Vec<ReportedAction>,
}
