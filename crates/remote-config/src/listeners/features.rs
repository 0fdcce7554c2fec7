use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use appsec_core::Result;
use appsec_engine::{Meta, Metrics};

use crate::aggregators::{AsmFeaturesAggregator, ConfigAggregator};
use crate::config::RemoteConfig;
use crate::product::Product;

use super::{product_for, ProductListener};

const PRODUCTS: &[Product] = &[Product::AsmFeatures];

/// Remote activation state driven by `asm.enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppsecState {
    /// No remote decision; local configuration applies.
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl AppsecState {
    fn from_document(doc: &Map<String, Json>) -> Self {
        match doc.get("asm").and_then(|asm| asm.get("enabled")) {
            Some(Json::Bool(true)) => AppsecState::Enabled,
            Some(Json::Bool(false)) => AppsecState::Disabled,
            Some(Json::String(s)) if s.eq_ignore_ascii_case("true") => AppsecState::Enabled,
            Some(Json::String(s)) if s.eq_ignore_ascii_case("false") => AppsecState::Disabled,
            _ => AppsecState::Unset,
        }
    }
}

/// Last committed ASM_FEATURES document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    document: Map<String, Json>,
    state: AppsecState,
}

impl Features {
    pub fn state(&self) -> AppsecState {
        self.state
    }

    pub fn document(&self) -> &Map<String, Json> {
        &self.document
    }

    pub fn auto_user_instrum_mode(&self) -> Option<&str> {
        self.document.get("auto_user_instrum")?.get("mode")?.as_str()
    }

    pub fn api_security_sample_rate(&self) -> Option<f64> {
        self.document
            .get("api_security")?
            .get("request_sample_rate")?
            .as_f64()
    }

    pub fn attack_mode_enabled(&self) -> Option<bool> {
        self.document
            .get("attack_mode")?
            .get("isAttackModeEnabled")?
            .as_bool()
    }
}

/// ASM_FEATURES listener. Readers observe commits through [`FeaturesListener::handle`].
pub struct FeaturesListener {
    aggregator: AsmFeaturesAggregator,
    touched: bool,
    current: Arc<ArcSwap<Features>>,
}

impl Default for FeaturesListener {
    fn default() -> Self {
        Self::new()
    }
}

impl FeaturesListener {
    pub fn new() -> Self {
        Self {
            aggregator: AsmFeaturesAggregator::new(),
            touched: false,
            current: Arc::new(ArcSwap::from_pointee(Features::default())),
        }
    }

    pub fn handle(&self) -> Arc<ArcSwap<Features>> {
        Arc::clone(&self.current)
    }

    pub fn features(&self) -> Arc<Features> {
        self.current.load_full()
    }
}

impl ProductListener for FeaturesListener {
    fn products(&self) -> &'static [Product] {
        PRODUCTS
    }

    fn init(&mut self) {
        self.aggregator.init();
        self.touched = false;
    }

    fn on_update(&mut self, config: &RemoteConfig) -> Result<()> {
        product_for(config, PRODUCTS)?;
        self.touched = true;
        self.aggregator.add(config)
    }

    fn on_unapply(&mut self, config: &RemoteConfig) -> Result<()> {
        product_for(config, PRODUCTS)?;
        self.touched = true;
        Ok(())
    }

    fn commit(&mut self, _meta: &mut Meta, _metrics: &mut Metrics) -> Result<()> {
        if !self.touched {
            debug!("features listener: nothing to commit");
            return Ok(());
        }

        let mut document = Map::new();
        self.aggregator.aggregate(&mut document);
        let state = AppsecState::from_document(&document);
        self.current.store(Arc::new(Features { document, state }));
        info!(state = ?state, "asm features committed");
        self.touched = false;
        Ok(())
    }
}
