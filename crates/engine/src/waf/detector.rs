use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tracing::{debug, info};

use appsec_core::{AppsecError, EngineSettings, Result, Value};

use crate::detector::{Detector, Listener};
use crate::matcher::{Diagnostics, Matcher, RuleMatcher};
use crate::telemetry::{self, Meta, Metrics};

use super::listener::WafListener;
use super::obfuscator::Obfuscator;

pub const WAF_DETECTOR_NAME: &str = "waf";

/// Ruleset used when no rules file is configured.
pub const DEFAULT_RULESET: &str = include_str!("../../rules/recommended.json");

/// Read the static ruleset from `path`, or the embedded default.
pub fn load_ruleset(path: Option<&Path>) -> Result<Json> {
    let contents = match path {
        Some(path) => fs::read_to_string(path).map_err(|e| {
            AppsecError::invalid_config(format!("unable to read rules file {}: {e}", path.display()))
        })?,
        None => DEFAULT_RULESET.to_string(),
    };
    serde_json::from_str(&contents)
        .map_err(|e| AppsecError::invalid_config(format!("invalid ruleset json: {e}")))
}

/// Write load diagnostics as span meta/metrics.
pub fn write_diagnostics(diag: &Diagnostics, meta: &mut Meta, metrics: &mut Metrics) {
    if !diag.rules_version.is_empty() {
        meta.insert(telemetry::EVENT_RULES_VERSION.to_string(), diag.rules_version.clone());
    }
    meta.insert(telemetry::WAF_VERSION.to_string(), telemetry::MATCHER_VERSION.to_string());
    meta.insert(telemetry::EVENT_RULES_ERRORS.to_string(), diag.errors_json());
    metrics.insert(telemetry::EVENT_RULES_LOADED.to_string(), diag.loaded.len() as f64);
    metrics.insert(telemetry::EVENT_RULES_FAILED.to_string(), diag.failed.len() as f64);
}

/// Detector adapter over a [`Matcher`].
pub struct WafDetector {
    matcher: Arc<dyn Matcher>,
    addresses: BTreeSet<String>,
    timeout: Duration,
    obfuscator: Arc<Obfuscator>,
}

impl WafDetector {
    pub fn new(matcher: Arc<dyn Matcher>, timeout_us: u64, obfuscator: Obfuscator) -> Self {
        Self::with_shared(matcher, Duration::from_micros(timeout_us), Arc::new(obfuscator))
    }

    fn with_shared(matcher: Arc<dyn Matcher>, timeout: Duration, obfuscator: Arc<Obfuscator>) -> Self {
        Self {
            addresses: matcher.addresses(),
            matcher,
            timeout,
            obfuscator,
        }
    }

    /// Compile `ruleset` with the builtin matcher.
    pub fn from_json(
        ruleset: &Json,
        timeout_us: u64,
        obfuscator: Obfuscator,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Self> {
        let (matcher, diag) = RuleMatcher::from_json(ruleset)?;
        write_diagnostics(&diag, meta, metrics);
        info!(
            rules = matcher.rule_count(),
            failed = diag.failed.len(),
            version = %diag.rules_version,
            "waf initialized"
        );
        Ok(Self::new(Arc::new(matcher), timeout_us, obfuscator))
    }

    /// Convenience constructor; load diagnostics are dropped.
    pub fn from_string(
        ruleset: &str,
        timeout_us: u64,
        key_regex: &str,
        value_regex: &str,
    ) -> Result<Self> {
        let json: Json = serde_json::from_str(ruleset)
            .map_err(|e| AppsecError::invalid_config(format!("invalid ruleset json: {e}")))?;
        let obfuscator = Obfuscator::new(key_regex, value_regex)?;
        Self::from_json(&json, timeout_us, obfuscator, &mut Meta::new(), &mut Metrics::new())
    }

    /// Timeout and redaction patterns come from `settings`; the ruleset is
    /// usually [`load_ruleset`] of `settings.rules_file`.
    pub fn from_settings(
        settings: &EngineSettings,
        ruleset: &Json,
        meta: &mut Meta,
        metrics: &mut Metrics,
    ) -> Result<Self> {
        let obfuscator =
            Obfuscator::new(&settings.obfuscator_key_regex, &settings.obfuscator_value_regex)?;
        Self::from_json(ruleset, settings.waf_timeout_us, obfuscator, meta, metrics)
    }

    pub fn matcher(&self) -> &Arc<dyn Matcher> {
        &self.matcher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Detector for WafDetector {
    fn name(&self) -> &str {
        WAF_DETECTOR_NAME
    }

    fn subscriptions(&self) -> &BTreeSet<String> {
        &self.addresses
    }

    fn listener(&self) -> Box<dyn Listener> {
        Box::new(WafListener::new(
            Arc::clone(&self.matcher),
            self.timeout,
            Arc::clone(&self.obfuscator),
        ))
    }

    fn update(&self, config: &Value, meta: &mut Meta, metrics: &mut Metrics) -> Result<Arc<dyn Detector>> {
        let (matcher, diag) = self.matcher.update(&config.to_json())?;
        write_diagnostics(&diag, meta, metrics);
        debug!(
            loaded = diag.loaded.len(),
            failed = diag.failed.len(),
            "waf ruleset updated"
        );
        Ok(Arc::new(Self::with_shared(
            matcher,
            self.timeout,
            Arc::clone(&self.obfuscator),
        )))
    }
}
