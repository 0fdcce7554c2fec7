//! Product listeners: the per-generation lifecycle driving the aggregators
//! and pushing merged documents to the engine.

mod engine;
mod features;
mod registry;

pub use self::engine::{EngineListener, EngineUpdate};
pub use self::features::{AppsecState, Features, FeaturesListener};
pub use self::registry::ListenerRegistry;

use appsec_core::{AppsecError, Result};
use appsec_engine::{Meta, Metrics};

use crate::config::RemoteConfig;
use crate::product::Product;

/// One generation is `init` → (`on_update` | `on_unapply`)* → `commit`.
pub trait ProductListener: Send {
    /// Products routed to this listener.
    fn products(&self) -> &'static [Product];

    /// Reset accumulation for a new generation.
    fn init(&mut self);

    fn on_update(&mut self, config: &RemoteConfig) -> Result<()>;

    /// A previously applied config was removed.
    fn on_unapply(&mut self, config: &RemoteConfig) -> Result<()>;

    /// Apply everything accumulated this generation.
    fn commit(&mut self, meta: &mut Meta, metrics: &mut Metrics) -> Result<()>;
}

/// Resolve the product of `config`, rejecting names this listener does not
/// handle.
pub(crate) fn product_for(config: &RemoteConfig, handled: &[Product]) -> Result<Product> {
    config
        .product_kind()
        .filter(|p| handled.contains(p))
        .ok_or_else(|| AppsecError::invalid_config(format!("unknown product {}", config.product)))
}
