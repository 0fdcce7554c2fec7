//! Shared building blocks for the appsec engine.
//!
//! - [`Value`] / [`ValueView`]: the request and configuration data model
//! - [`AppsecError`]: error taxonomy shared by every layer
//! - [`EngineSettings`]: environment-driven engine configuration

pub mod config;
pub mod error;
pub mod value;

pub use config::EngineSettings;
pub use error::*;
pub use value::{Value, ValueView};
