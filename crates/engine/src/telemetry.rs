//! Span meta/metric sinks passed explicitly through update and call paths.

use std::collections::BTreeMap;

pub type Meta = BTreeMap<String, String>;
pub type Metrics = BTreeMap<String, f64>;

pub const EVENT_RULES_VERSION: &str = "_dd.appsec.event_rules.version";
pub const WAF_VERSION: &str = "_dd.appsec.waf.version";
pub const EVENT_RULES_ERRORS: &str = "_dd.appsec.event_rules.errors";
pub const EVENT_RULES_LOADED: &str = "_dd.appsec.event_rules.loaded";
pub const EVENT_RULES_FAILED: &str = "_dd.appsec.event_rules.error_count";
pub const WAF_DURATION: &str = "_dd.appsec.waf.duration";
pub const WAF_TIMEOUTS: &str = "_dd.appsec.waf.timeouts";

/// Version reported as `waf_version` by the builtin matcher.
pub const MATCHER_VERSION: &str = env!("CARGO_PKG_VERSION");
