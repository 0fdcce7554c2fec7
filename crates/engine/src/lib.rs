//! In-process application security engine.
//!
//! This crate provides:
//! - Detector/Listener traits, the seam for pluggable detection logic
//! - [`Engine`] with copy-on-write detector generations and a force-keep rate limiter
//! - [`Context`] publish dispatch and [`Event`] materialization
//! - The WAF detector adapter and a builtin JSON ruleset matcher

pub mod action;
pub mod detector;
pub mod engine;
pub mod event;
pub mod matcher;
pub mod telemetry;
pub mod waf;

pub use action::{Action, ActionParameters, ActionTable, ActionType};
pub use detector::{Detector, Listener};
pub use engine::{Context, Engine, RateLimiter};
pub use event::Event;
pub use matcher::{Matcher, RuleMatcher};
pub use telemetry::{Meta, Metrics};
pub use waf::{Obfuscator, WafDetector};
