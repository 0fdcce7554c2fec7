//! Remote configuration plumbing for the appsec engine.
//!
//! Fragments arrive per product, are folded by per-product aggregators
//! during one generation (`init` → `on_update`/`on_unapply` → `commit`) and
//! the merged document is pushed to [`Engine::update`](appsec_engine::Engine::update).

pub mod aggregators;
pub mod config;
pub mod listeners;
pub mod product;

pub use aggregators::{AsmAggregator, AsmDataAggregator, AsmFeaturesAggregator, ConfigAggregator};
pub use config::{ParsedConfigKey, RemoteConfig};
pub use listeners::{
    AppsecState, EngineListener, EngineUpdate, Features, FeaturesListener, ListenerRegistry,
    ProductListener,
};
pub use product::Product;
