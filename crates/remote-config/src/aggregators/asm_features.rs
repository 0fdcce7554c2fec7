use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use appsec_core::{AppsecError, Result};

use crate::config::RemoteConfig;

use super::ConfigAggregator;

const FEATURE_KEYS: [&str; 4] = ["asm", "auto_user_instrum", "attack_mode", "api_security"];

/// ASM_FEATURES aggregator: last fragment wins per feature key.
#[derive(Debug, Default, Clone)]
pub struct AsmFeaturesAggregator {
    features: IndexMap<String, Json>,
}

impl AsmFeaturesAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.features.get(key)
    }
}

impl ConfigAggregator for AsmFeaturesAggregator {
    fn init(&mut self) {
        self.features.clear();
    }

    /// A known key with a non-object value rejects the whole fragment.
    fn add(&mut self, config: &RemoteConfig) -> Result<()> {
        let doc = config.read_json()?;
        let Json::Object(doc) = doc else {
            return Err(AppsecError::invalid_config(
                "Invalid config json contents: expected an object",
            ));
        };

        let mut accepted = Vec::new();
        for key in FEATURE_KEYS {
            match doc.get(key) {
                None => {}
                Some(value @ Json::Object(_)) => accepted.push((key, value.clone())),
                Some(_) => {
                    return Err(AppsecError::invalid_config(format!(
                        "Invalid config json contents: {key} key invalid"
                    )))
                }
            }
        }

        for (key, value) in accepted {
            self.features.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn aggregate(&self, doc: &mut Map<String, Json>) {
        for (key, value) in &self.features {
            doc.insert(key.clone(), value.clone());
        }
    }
}
