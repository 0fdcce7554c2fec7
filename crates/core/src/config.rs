use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Default key pattern for redacting matched parameters.
pub const DEFAULT_OBFUSCATOR_KEY_REGEX: &str = r"(?i)(?:p(?:ass)?w(?:or)?d|pass(?:_?phrase)?|secret|(?:api_?|private_?|public_?)key|token|consumer_?(?:id|key|secret)|sign(?:ed|ature)|bearer|authorization)";

/// Default value pattern for redacting matched parameters.
pub const DEFAULT_OBFUSCATOR_VALUE_REGEX: &str = r#"(?i)(?:p(?:ass)?w(?:or)?d|pass(?:_?phrase)?|secret|(?:api_?|private_?|public_?|access_?|secret_?)key(?:_?id)?|token|consumer_?(?:id|key|secret)|sign(?:ed|ature)?|auth(?:entication|orization)?)(?:\s*=[^;]|"\s*:\s*"[^"]+")|bearer\s+[a-z0-9._\-]+|eyJ[a-z0-9_\-]+\.eyJ[a-z0-9_\-]+(?:\.[a-z0-9_\-]+)?"#;

pub const DEFAULT_WAF_TIMEOUT_US: u64 = 10_000;
pub const DEFAULT_TRACE_RATE_LIMIT: u32 = 100;

fn profiled_env_opt(lookup: &dyn Fn(&str) -> Option<String>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        if let Some(v) = lookup(&format!("{}_{}", profile, key)).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

/// Engine-level knobs: ruleset location, evaluation budget, sampling and
/// redaction patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Static ruleset file; the embedded default is used when unset.
    pub rules_file: Option<PathBuf>,
    /// Per-call matcher budget in microseconds.
    pub waf_timeout_us: u64,
    /// Max force-kept events per second; 0 keeps every event.
    pub trace_rate_limit: u32,
    pub obfuscator_key_regex: String,
    pub obfuscator_value_regex: String,
    pub schema_extraction_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            profile: String::new(),
            rules_file: None,
            waf_timeout_us: DEFAULT_WAF_TIMEOUT_US,
            trace_rate_limit: DEFAULT_TRACE_RATE_LIMIT,
            obfuscator_key_regex: DEFAULT_OBFUSCATOR_KEY_REGEX.to_string(),
            obfuscator_value_regex: DEFAULT_OBFUSCATOR_VALUE_REGEX.to_string(),
            schema_extraction_enabled: false,
        }
    }
}

impl EngineSettings {
    /// Build settings from environment variables (call `load_dotenv()` first).
    /// When `APPSEC_PROFILE` is set (e.g. `STAGING`), every key is first
    /// looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("APPSEC_PROFILE").unwrap_or_default().to_uppercase();
        Self::from_lookup(&profile, |key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Missing or unparseable
    /// values fall back to the defaults.
    pub fn from_lookup(profile: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let p = profile.to_uppercase();
        let get = |key: &str| profiled_env_opt(&lookup, &p, key);
        let defaults = Self::default();

        Self {
            profile: p.clone(),
            rules_file: get("APPSEC_RULES").map(PathBuf::from),
            waf_timeout_us: get("APPSEC_WAF_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.waf_timeout_us),
            trace_rate_limit: get("APPSEC_TRACE_RATE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trace_rate_limit),
            obfuscator_key_regex: get("APPSEC_OBFUSCATION_PARAMETER_KEY_REGEXP")
                .unwrap_or(defaults.obfuscator_key_regex),
            obfuscator_value_regex: get("APPSEC_OBFUSCATION_PARAMETER_VALUE_REGEXP")
                .unwrap_or(defaults.obfuscator_value_regex),
            schema_extraction_enabled: get("APPSEC_SCHEMA_EXTRACTION_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.schema_extraction_enabled),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print the effective settings for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine settings loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  rules:       {}",
            self.rules_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(embedded)".to_string())
        );
        tracing::info!("  waf timeout: {}us", self.waf_timeout_us);
        tracing::info!("  rate limit:  {}/s", self.trace_rate_limit);
        tracing::info!("  schemas:     {}", self.schema_extraction_enabled);
    }
}
