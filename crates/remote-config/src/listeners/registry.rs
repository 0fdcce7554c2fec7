use std::collections::HashMap;

use tracing::warn;

use appsec_core::{AppsecError, Result};
use appsec_engine::{Meta, Metrics};

use crate::config::RemoteConfig;
use crate::product::Product;

use super::ProductListener;

/// Routes fragments to the listener registered for their product.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Box<dyn ProductListener>>,
    routes: HashMap<Product, usize>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if one of the listener's products is already routed.
    pub fn register(&mut self, listener: Box<dyn ProductListener>) -> Result<()> {
        if let Some(taken) = listener.products().iter().find(|p| self.routes.contains_key(*p)) {
            return Err(AppsecError::invalid_config(format!(
                "product {taken} already has a listener"
            )));
        }
        let index = self.listeners.len();
        for product in listener.products() {
            self.routes.insert(*product, index);
        }
        self.listeners.push(listener);
        Ok(())
    }

    /// Products with a registered listener, in declaration order.
    pub fn products(&self) -> Vec<Product> {
        Product::ALL
            .into_iter()
            .filter(|p| self.routes.contains_key(p))
            .collect()
    }

    fn route(&mut self, config: &RemoteConfig) -> Result<&mut Box<dyn ProductListener>> {
        let index = config
            .product_kind()
            .and_then(|p| self.routes.get(&p).copied())
            .ok_or_else(|| AppsecError::invalid_config(format!("unknown product {}", config.product)))?;
        Ok(&mut self.listeners[index])
    }

    pub fn init(&mut self) {
        for listener in &mut self.listeners {
            listener.init();
        }
    }

    pub fn on_update(&mut self, config: &RemoteConfig) -> Result<()> {
        self.route(config)?.on_update(config).inspect_err(|e| {
            warn!(product = %config.product, config = %config.id, error = %e, "config rejected");
        })
    }

    pub fn on_unapply(&mut self, config: &RemoteConfig) -> Result<()> {
        self.route(config)?.on_unapply(config)
    }

    /// Commit every listener; the first failure is returned once all have
    /// run.
    pub fn commit(&mut self, meta: &mut Meta, metrics: &mut Metrics) -> Result<()> {
        let mut first_error = None;
        for listener in &mut self.listeners {
            if let Err(e) = listener.commit(meta, metrics) {
                warn!(error = %e, "listener commit failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use appsec_engine::Engine;

    use super::*;
    use crate::listeners::{AppsecState, EngineListener, FeaturesListener};

    fn registry() -> (ListenerRegistry, Arc<Engine>, FeaturesListener) {
        let engine = Arc::new(Engine::new(0));
        let features = FeaturesListener::new();
        let mut registry = ListenerRegistry::new();
        registry
            .register(Box::new(EngineListener::new(engine.clone())))
            .unwrap();
        (registry, engine, features)
    }

    #[test]
    fn routes_by_product() {
        let (mut registry, _, features) = registry();
        let handle = features.handle();
        registry.register(Box::new(features)).unwrap();
        assert_eq!(registry.products(), Product::ALL.to_vec());

        registry.init();
        registry
            .on_update(&RemoteConfig::from_json_text("ASM_FEATURES", r#"{"asm":{"enabled":true}}"#))
            .unwrap();
        registry
            .on_update(&RemoteConfig::from_json_text("ASM", r#"{"actions":[]}"#))
            .unwrap();
        registry.commit(&mut Meta::new(), &mut Metrics::new()).unwrap();
        assert_eq!(handle.load().state(), AppsecState::Enabled);
    }

    #[test]
    fn unknown_or_unrouted_products_fail() {
        let (mut registry, _, _) = registry();
        let err = registry
            .on_update(&RemoteConfig::from_json_text("ASM_FEATURES", "{}"))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown product ASM_FEATURES");
        assert!(registry
            .on_unapply(&RemoteConfig::from_json_text("LIVE_DEBUGGING", "{}"))
            .is_err());
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let (mut registry, engine, _) = registry();
        let err = registry
            .register(Box::new(EngineListener::new(engine)))
            .unwrap_err();
        assert_eq!(err.to_string(), "product ASM already has a listener");
        assert_eq!(registry.products().len(), 3);
    }
}
