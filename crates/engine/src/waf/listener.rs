use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace};

use appsec_core::{AppsecError, Result, ValueView};

use crate::action::{Action, ActionType};
use crate::detector::Listener;
use crate::event::Event;
use crate::matcher::{ConditionMatch, Deadline, Matcher, RuleMatch};
use crate::telemetry::{self, Meta, Metrics};

use super::obfuscator::{Obfuscator, REDACTED};

// ── Match record shape ──────────────────────────────────────────────

#[derive(Serialize)]
struct MatchRecord<'a> {
    rule: RuleRecord<'a>,
    rule_matches: Vec<ConditionRecord<'a>>,
}

#[derive(Serialize)]
struct RuleRecord<'a> {
    id: &'a str,
    name: &'a str,
    tags: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ConditionRecord<'a> {
    operator: &'a str,
    operator_value: &'a str,
    parameters: [ParameterRecord<'a>; 1],
}

#[derive(Serialize)]
struct ParameterRecord<'a> {
    address: &'a str,
    key_path: &'a [String],
    value: &'a str,
    highlight: [&'a str; 1],
}

fn condition_record<'a>(c: &'a ConditionMatch, obfuscator: &Obfuscator) -> ConditionRecord<'a> {
    let (value, highlight) = if obfuscator.should_redact(&c.key_path, &c.value) {
        (REDACTED, REDACTED)
    } else {
        (c.value.as_str(), c.highlight.as_str())
    };
    ConditionRecord {
        operator: &c.operator,
        operator_value: &c.operator_value,
        parameters: [ParameterRecord {
            address: &c.address,
            key_path: &c.key_path,
            value,
            highlight: [highlight],
        }],
    }
}

/// Serialize one rule match, redacting sensitive parameters.
pub(crate) fn match_record(m: &RuleMatch, obfuscator: &Obfuscator) -> Result<String> {
    let record = MatchRecord {
        rule: RuleRecord {
            id: &m.rule_id,
            name: &m.name,
            tags: &m.tags,
        },
        rule_matches: m
            .conditions
            .iter()
            .map(|c| condition_record(c, obfuscator))
            .collect(),
    };
    Ok(serde_json::to_string(&record)?)
}

// ── Listener ────────────────────────────────────────────────────────

/// Per-context WAF handle. Rules that already matched in this context are
/// not evaluated again.
pub struct WafListener {
    matcher: Arc<dyn Matcher>,
    timeout: Duration,
    obfuscator: Arc<Obfuscator>,
    fired: HashSet<String>,
    duration_us: f64,
    timeouts: u64,
}

impl WafListener {
    pub(crate) fn new(matcher: Arc<dyn Matcher>, timeout: Duration, obfuscator: Arc<Obfuscator>) -> Self {
        Self {
            matcher,
            timeout,
            obfuscator,
            fired: HashSet::new(),
            duration_us: 0.0,
            timeouts: 0,
        }
    }
}

impl Listener for WafListener {
    fn call(&mut self, data: ValueView<'_>, event: &mut Event) -> Result<()> {
        if !data.is_map() {
            return Err(AppsecError::invalid_object(format!(
                "expected a map at the root, got {}",
                data.value().kind()
            )));
        }

        let started = Instant::now();
        let deadline = Deadline::new(self.timeout);
        let result = self.matcher.evaluate(data, &deadline, &self.fired);
        self.duration_us += started.elapsed().as_secs_f64() * 1_000_000.0;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_timeout() {
                    self.timeouts += 1;
                    debug!(budget_us = self.timeout.as_micros() as u64, "waf evaluation timed out");
                }
                return Err(e);
            }
        };

        for m in &outcome.matches {
            event.triggers.push(match_record(m, &self.obfuscator)?);
            self.fired.insert(m.rule_id.clone());
        }
        for reported in outcome.actions {
            match ActionType::from_matcher_type(&reported.kind) {
                Some(action_type) => event
                    .actions
                    .push(Action::with_parameters(action_type, reported.parameters)),
                None => trace!(id = %reported.id, kind = %reported.kind, "discarding action of unknown type"),
            }
        }
        Ok(())
    }

    fn get_meta_and_metrics(&self, meta: &mut Meta, metrics: &mut Metrics) {
        let version = self.matcher.rules_version();
        if !version.is_empty() {
            meta.insert(telemetry::EVENT_RULES_VERSION.to_string(), version.to_string());
        }
        metrics.insert(telemetry::WAF_DURATION.to_string(), self.duration_us);
        if self.timeouts > 0 {
            metrics.insert(telemetry::WAF_TIMEOUTS.to_string(), self.timeouts as f64);
        }
    }
}
