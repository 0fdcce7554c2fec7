//! WAF detector: adapts a [`Matcher`](crate::matcher::Matcher) to the
//! [`Detector`](crate::detector::Detector)/[`Listener`](crate::detector::Listener)
//! contract.
//!
//! The adapter owns everything the matcher does not: the per-call time
//! budget, mapping reported action types onto [`ActionType`](crate::action::ActionType),
//! match record serialization and redaction of sensitive parameters.

mod detector;
mod listener;
mod obfuscator;


pub use self::detector::{
    load_ruleset, write_diagnostics, WafDetector, DEFAULT_RULESET, WAF_DETECTOR_NAME,
};
pub use self::listener::WafListener;
pub use self::obfuscator::{Obfuscator, REDACTED};
