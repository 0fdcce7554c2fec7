use regex::{Regex, RegexBuilder};

use appsec_core::{AppsecError, Result};

/// Replaces sensitive values in serialized match records.
pub const REDACTED: &str = "<Redacted>";

/// Key and value patterns deciding which matched parameters get redacted.
/// An empty pattern disables that half.
#[derive(Debug, Clone, Default)]
pub struct Obfuscator {
    key: Option<Regex>,
    value: Option<Regex>,
}

fn compile(pattern: &str, what: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| AppsecError::invalid_config(format!("invalid obfuscator {what} regex: {e}")))
}

impl Obfuscator {
    pub fn new(key_pattern: &str, value_pattern: &str) -> Result<Self> {
        Ok(Self {
            key: compile(key_pattern, "key")?,
            value: compile(value_pattern, "value")?,
        })
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some() || self.value.is_some()
    }

    /// True when any key path component matches the key pattern or the
    /// value matches the value pattern.
    pub fn should_redact(&self, key_path: &[String], value: &str) -> bool {
        let key_hit = self
            .key
            .as_ref()
            .is_some_and(|re| key_path.iter().any(|k| re.is_match(k)));
        key_hit || self.value.as_ref().is_some_and(|re| re.is_match(value))
    }
}
