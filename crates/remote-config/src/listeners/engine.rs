use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use appsec_core::{AppsecError, EngineSettings, Result, Value};
use appsec_engine::waf::load_ruleset;
use appsec_engine::{Engine, Meta, Metrics};

use crate::aggregators::{AsmAggregator, AsmDataAggregator, ConfigAggregator};
use crate::config::RemoteConfig;
use crate::product::Product;

use super::{product_for, ProductListener};

const PRODUCTS: &[Product] = &[Product::Asm, Product::AsmDd, Product::AsmData];

/// Sink for merged update documents.
pub trait EngineUpdate: Send + Sync {
    fn update(&self, config: &Value, meta: &mut Meta, metrics: &mut Metrics);
}

impl EngineUpdate for Engine {
    fn update(&self, config: &Value, meta: &mut Meta, metrics: &mut Metrics) {
        Engine::update(self, config, meta, metrics);
    }
}

/// `rules` plus optional `metadata` taken from an ASM_DD document.
#[derive(Debug, Clone, PartialEq)]
struct Ruleset {
    rules: Vec<Json>,
    metadata: Option<Json>,
}

impl Ruleset {
    fn from_doc(doc: &Json) -> Result<Self> {
        let rules = doc.get("rules").and_then(Json::as_array).ok_or_else(|| {
            AppsecError::invalid_config("Invalid config json contents: rules key missing or invalid")
        })?;
        Ok(Self {
            rules: rules.clone(),
            metadata: doc.get("metadata").cloned(),
        })
    }

    fn write(&self, doc: &mut Map<String, Json>) {
        doc.insert("rules".to_string(), Json::Array(self.rules.clone()));
        if let Some(metadata) = &self.metadata {
            doc.insert("metadata".to_string(), metadata.clone());
        }
    }
}

/// Fans ASM, ASM_DD and ASM_DATA fragments into one engine update per
/// generation.
pub struct EngineListener {
    engine: Arc<dyn EngineUpdate>,
    fallback: Option<Ruleset>,
    asm: AsmAggregator,
    asm_data: AsmDataAggregator,
    ruleset: Option<Ruleset>,
    touched: BTreeSet<Product>,
}

impl EngineListener {
    pub fn new(engine: Arc<dyn EngineUpdate>) -> Self {
        Self {
            engine,
            fallback: None,
            asm: AsmAggregator::new(),
            asm_data: AsmDataAggregator::new(),
            ruleset: None,
            touched: BTreeSet::new(),
        }
    }

    /// `fallback` is the static ruleset restored when the ASM_DD config is
    /// removed.
    pub fn with_fallback(engine: Arc<dyn EngineUpdate>, fallback: &Json) -> Result<Self> {
        let mut listener = Self::new(engine);
        listener.fallback = Some(Ruleset::from_doc(fallback)?);
        Ok(listener)
    }

    /// Fallback is the configured rules file, or the embedded ruleset.
    pub fn from_settings(engine: Arc<dyn EngineUpdate>, settings: &EngineSettings) -> Result<Self> {
        let ruleset = load_ruleset(settings.rules_file.as_deref())?;
        Self::with_fallback(engine, &ruleset)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Document `commit` would send, if anything was touched.
    pub fn pending_document(&self) -> Option<Map<String, Json>> {
        if self.touched.is_empty() {
            return None;
        }
        let mut doc = Map::new();
        if let Some(ruleset) = &self.ruleset {
            ruleset.write(&mut doc);
        }
        self.asm.aggregate(&mut doc);
        self.asm_data.aggregate(&mut doc);
        Some(doc)
    }
}

impl ProductListener for EngineListener {
    fn products(&self) -> &'static [Product] {
        PRODUCTS
    }

    fn init(&mut self) {
        self.asm.init();
        self.asm_data.init();
        self.ruleset = None;
        self.touched.clear();
    }

    fn on_update(&mut self, config: &RemoteConfig) -> Result<()> {
        let product = product_for(config, PRODUCTS)?;
        self.touched.insert(product);
        match product {
            Product::Asm => self.asm.add(config),
            Product::AsmData => self.asm_data.add(config),
            _ => {
                let doc = config.read_json()?;
                self.ruleset = Some(Ruleset::from_doc(&doc)?);
                Ok(())
            }
        }
    }

    fn on_unapply(&mut self, config: &RemoteConfig) -> Result<()> {
        let product = product_for(config, PRODUCTS)?;
        self.touched.insert(product);
        if product == Product::AsmDd {
            match &self.fallback {
                Some(fallback) => self.ruleset = Some(fallback.clone()),
                None => debug!(config = %config.id, "ruleset removed without a fallback"),
            }
        }
        Ok(())
    }

    fn commit(&mut self, meta: &mut Meta, metrics: &mut Metrics) -> Result<()> {
        let Some(doc) = self.pending_document() else {
            debug!("engine listener: nothing to commit");
            return Ok(());
        };

        let value = Value::from(Json::Object(doc));
        self.engine.update(&value, meta, metrics);
        info!(
            products = ?self.touched,
            rules_replaced = self.ruleset.is_some(),
            "engine listener committed"
        );
        self.touched.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingEngine {
        updates: Mutex<Vec<Json>>,
    }

    impl EngineUpdate for RecordingEngine {
        fn update(&self, config: &Value, _meta: &mut Meta, _metrics: &mut Metrics) {
            self.updates.lock().push(config.to_json());
        }
    }

    fn listener() -> (Arc<RecordingEngine>, EngineListener) {
        let engine = Arc::new(RecordingEngine::default());
        let listener = EngineListener::new(engine.clone());
        (engine, listener)
    }

    fn commit(listener: &mut EngineListener) -> Result<()> {
        listener.commit(&mut Meta::new(), &mut Metrics::new())
    }

    const RULES: &str = r#"{"version":"2.1","metadata":{"rules_version":"1.4.2"},"rules":[{"id":"1","name":"rule1","tags":{"type":"flow1","category":"category1"},"conditions":[{"operator":"match_regex","parameters":{"inputs":[{"address":"arg1"}],"regex":".*"}}]}]}"#;

    #[test]
    fn no_updates_means_no_engine_update() {
        let (engine, mut listener) = listener();
        listener.init();
        commit(&mut listener).unwrap();
        assert!(engine.updates.lock().is_empty());
    }

    #[test]
    fn unknown_product_is_rejected() {
        let (engine, mut listener) = listener();
        listener.init();
        let err = listener
            .on_update(&RemoteConfig::from_json_text("UNKNOWN", RULES))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown product UNKNOWN");
        let err = listener
            .on_update(&RemoteConfig::from_json_text("ASM_FEATURES", "{}"))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown product ASM_FEATURES");
        commit(&mut listener).unwrap();
        assert!(engine.updates.lock().is_empty());
    }

    #[test]
    fn ruleset_update_carries_rules_and_metadata() {
        let (engine, mut listener) = listener();
        listener.init();
        listener.on_update(&RemoteConfig::from_json_text("ASM_DD", RULES)).unwrap();
        commit(&mut listener).unwrap();

        let updates = engine.updates.lock();
        assert_eq!(updates.len(), 1);
        let doc = &updates[0];
        assert_eq!(doc["rules"].as_array().unwrap().len(), 1);
        assert_eq!(doc["metadata"]["rules_version"], "1.4.2");
        for key in ["rules_override", "exclusions", "actions", "custom_rules", "rules_data"] {
            assert_eq!(doc[key], json!([]), "{key}");
        }
    }

    #[test]
    fn asm_only_generation_omits_rules() {
        let (engine, mut listener) = listener();
        listener.init();
        listener
            .on_update(&RemoteConfig::from_json_text(
                "ASM",
                r#"{"exclusions":[{"id":1,"rules_target":[{"rule_id":1}]}]}"#,
            ))
            .unwrap();
        listener
            .on_update(&RemoteConfig::from_json_text(
                "ASM_DATA",
                r#"{"rules_data":[{"id":"blocked_ips","type":"ip_with_expiration","data":[{"value":"1.2.3.4","expiration":0}]}]}"#,
            ))
            .unwrap();
        commit(&mut listener).unwrap();

        let updates = engine.updates.lock();
        let doc = updates[0].as_object().unwrap();
        assert!(!doc.contains_key("rules"));
        assert_eq!(doc["exclusions"].as_array().unwrap().len(), 1);
        assert_eq!(doc["rules_data"][0]["id"], "blocked_ips");
    }

    #[test]
    fn invalid_ruleset_is_rejected() {
        let (_, mut listener) = listener();
        listener.init();
        let err = listener
            .on_update(&RemoteConfig::from_json_text("ASM_DD", r#"{"rules": {}}"#))
            .unwrap_err();
        assert!(err.to_string().contains("rules key missing or invalid"));
        assert!(listener.pending_document().unwrap().get("rules").is_none());
    }

    #[test]
    fn unapply_restores_the_fallback() {
        let engine = Arc::new(RecordingEngine::default());
        let fallback: Json = serde_json::from_str(RULES).unwrap();
        let mut listener = EngineListener::with_fallback(engine.clone(), &fallback).unwrap();
        assert!(listener.has_fallback());

        listener.init();
        listener
            .on_unapply(&RemoteConfig::from_json_text("ASM_DD", "{}"))
            .unwrap();
        commit(&mut listener).unwrap();

        let updates = engine.updates.lock();
        assert_eq!(updates[0]["rules"], fallback["rules"]);
        assert_eq!(updates[0]["metadata"], fallback["metadata"]);
    }

    #[test]
    fn unapply_without_fallback_keeps_current_rules() {
        let (engine, mut listener) = listener();
        listener.init();
        listener
            .on_unapply(&RemoteConfig::from_json_text("ASM_DD", "{}"))
            .unwrap();
        commit(&mut listener).unwrap();

        let updates = engine.updates.lock();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].get("rules").is_none());
    }

    #[test]
    fn commit_clears_the_touched_set() {
        let (engine, mut listener) = listener();
        listener.init();
        listener
            .on_update(&RemoteConfig::from_json_text("ASM", r#"{"actions":[]}"#))
            .unwrap();
        commit(&mut listener).unwrap();
        commit(&mut listener).unwrap();
        assert_eq!(engine.updates.lock().len(), 1);
    }

    #[test]
    fn embedded_ruleset_is_the_default_fallback() {
        let engine = Arc::new(RecordingEngine::default());
        let listener = EngineListener::from_settings(engine, &EngineSettings::default()).unwrap();
        assert!(listener.has_fallback());
    }
}
