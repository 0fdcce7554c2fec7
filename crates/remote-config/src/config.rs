//! Remote configuration fragments and their delivery paths.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use appsec_core::{AppsecError, Result};

use crate::product::Product;

const INVALID_CONTENTS: &str = "Invalid config contents";

/// One configuration file as delivered by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub product: String,
    pub id: String,
    pub path: String,
    /// Base64 encoded payload.
    pub contents: String,
}

impl RemoteConfig {
    /// Build from a delivery path, taking product and id from it.
    pub fn new(path: &str, contents: impl Into<String>) -> Result<Self> {
        let key = ParsedConfigKey::from_rc_path(path)?;
        Ok(Self {
            product: key.product,
            id: key.config_id,
            path: path.to_string(),
            contents: contents.into(),
        })
    }

    /// Wrap a raw JSON payload under an employee path for `product`.
    pub fn from_json_text(product: &str, json: &str) -> Self {
        Self {
            product: product.to_string(),
            id: "0".to_string(),
            path: format!("employee/{product}/0/config"),
            contents: general_purpose::STANDARD.encode(json),
        }
    }

    pub fn product_kind(&self) -> Option<Product> {
        Product::from_name(&self.product)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(self.contents.as_bytes())
            .map_err(|_| AppsecError::invalid_config(INVALID_CONTENTS))
    }

    /// Decode and parse the payload as JSON.
    pub fn read_json(&self) -> Result<Json> {
        let bytes = self.decode()?;
        serde_json::from_slice(&bytes).map_err(|_| AppsecError::invalid_config(INVALID_CONTENTS))
    }
}

/// Components of a remote-config path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigKey {
    /// Org id for `datadog/` paths, empty for `employee/` paths.
    pub org_id: String,
    pub source: String,
    pub product: String,
    pub config_id: String,
    pub name: String,
}

impl ParsedConfigKey {
    /// Parse `datadog/<org>/<PRODUCT>/<id>/<name>` or
    /// `employee/<PRODUCT>/<id>/<name>`.
    pub fn from_rc_path(path: &str) -> Result<Self> {
        let invalid = || AppsecError::invalid_config(format!("invalid config path: {path}"));
        let parts: Vec<&str> = path.split('/').collect();

        let (source, org_id, rest) = match parts.as_slice() {
            ["datadog", org, rest @ ..] if rest.len() == 3 => {
                if org.is_empty() || !org.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                ("datadog", *org, rest)
            }
            ["employee", rest @ ..] if rest.len() == 3 => ("employee", "", rest),
            _ => return Err(invalid()),
        };

        if rest.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            org_id: org_id.to_string(),
            source: source.to_string(),
            product: rest[0].to_string(),
            config_id: rest[1].to_string(),
            name: rest[2].to_string(),
        })
    }

    pub fn full_path(&self) -> String {
        match self.source.as_str() {
            "datadog" => format!(
                "datadog/{}/{}/{}/{}",
                self.org_id, self.product, self.config_id, self.name
            ),
            source => format!("{}/{}/{}/{}", source, self.product, self.config_id, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_datadog_and_employee_paths() {
        let key = ParsedConfigKey::from_rc_path("datadog/2/ASM_DATA/blocked_ips/config").unwrap();
        assert_eq!(key.source, "datadog");
        assert_eq!(key.org_id, "2");
        assert_eq!(key.product, "ASM_DATA");
        assert_eq!(key.config_id, "blocked_ips");
        assert_eq!(key.name, "config");
        assert_eq!(key.full_path(), "datadog/2/ASM_DATA/blocked_ips/config");

        let key = ParsedConfigKey::from_rc_path("employee/ASM_DD/1.recommended.json/config").unwrap();
        assert_eq!(key.source, "employee");
        assert_eq!(key.org_id, "");
        assert_eq!(key.product, "ASM_DD");
        assert_eq!(key.full_path(), "employee/ASM_DD/1.recommended.json/config");
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in [
            "",
            "datadog/ASM/id/config",
            "datadog/abc/ASM/id/config",
            "employee/ASM/id",
            "employee/ASM//config",
            "other/2/ASM/id/config",
        ] {
            let err = ParsedConfigKey::from_rc_path(path).unwrap_err();
            assert!(err.to_string().starts_with("invalid config path"), "{path}");
        }
    }

    #[test]
    fn contents_are_base64_json() {
        let config = RemoteConfig::from_json_text("ASM", r#"{"actions":[]}"#);
        assert_eq!(config.product_kind(), Some(Product::Asm));
        assert_eq!(config.read_json().unwrap(), serde_json::json!({"actions": []}));

        let config = RemoteConfig::new("datadog/2/ASM_DATA/id/config", "&&&").unwrap();
        assert_eq!(config.product, "ASM_DATA");
        assert_eq!(config.id, "id");
        assert_eq!(config.read_json().unwrap_err().to_string(), "Invalid config contents");

        let not_json = RemoteConfig::from_json_text("ASM", "InvalidJsonContent");
        assert_eq!(not_json.read_json().unwrap_err().to_string(), "Invalid config contents");
    }
}
