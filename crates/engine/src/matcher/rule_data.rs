//! Rule data (blocklists) referenced by `ip_match` / `exact_match` via `data`.
//!
//! Expirations are unix seconds; 0 means the entry never expires.

use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use serde_json::Value as Json;
use tracing::debug;

use super::ruleset::{raw_id, RuleDataDef};
use super::Diagnostics;

#[derive(Debug, Clone, Default)]
pub(crate) struct RuleData {
    values: HashMap<String, u64>,
    networks: Vec<(IpNet, u64)>,
}

fn is_live(expiration: u64, now: u64) -> bool {
    expiration == 0 || expiration > now
}

/// Parse an address or CIDR block (`1.2.3.4`, `10.0.0.0/8`).
pub(crate) fn parse_network(value: &str) -> Option<IpNet> {
    let value = value.trim();
    value
        .parse::<IpNet>()
        .ok()
        .or_else(|| value.parse::<IpAddr>().ok().map(IpNet::from))
}

/// Numeric or numeric-string expiration; absent means never.
pub(crate) fn parse_expiration(raw: Option<&Json>) -> Result<u64, String> {
    match raw {
        None | Some(Json::Null) => Ok(0),
        Some(Json::Number(n)) => n
            .as_u64()
            .ok_or_else(|| format!("invalid expiration: {n}")),
        Some(Json::String(s)) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid expiration: {s}")),
        Some(other) => Err(format!("invalid expiration: {other}")),
    }
}

impl RuleData {
    pub fn insert(&mut self, value: String, expiration: u64) {
        self.values
            .entry(value)
            .and_modify(|current| {
                if *current != 0 {
                    *current = if expiration == 0 { 0 } else { (*current).max(expiration) };
                }
            })
            .or_insert(expiration);
    }

    fn finish(&mut self) {
        self.networks = self
            .values
            .iter()
            .filter_map(|(v, exp)| parse_network(v).map(|net| (net, *exp)))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn contains(&self, value: &str, now: u64) -> bool {
        self.values.get(value).is_some_and(|exp| is_live(*exp, now))
    }

    pub fn contains_ip(&self, ip: IpAddr, now: u64) -> bool {
        self.networks
            .iter()
            .any(|(net, exp)| is_live(*exp, now) && net.contains(&ip))
    }
}

/// Build the lookup tables from the `rules_data` entries. Bad entries are
/// recorded in `diag` and skipped.
pub(crate) fn build_tables(entries: &[Json], diag: &mut Diagnostics) -> HashMap<String, RuleData> {
    let mut tables: HashMap<String, RuleData> = HashMap::new();

    for raw in entries {
        let def: RuleDataDef = match serde_json::from_value(raw.clone()) {
            Ok(def) => def,
            Err(e) => {
                diag.record_error(&raw_id(raw), e.to_string());
                continue;
            }
        };

        let mut parsed = Vec::with_capacity(def.data.len());
        let mut invalid = None;
        for entry in &def.data {
            match parse_expiration(entry.expiration.as_ref()) {
                Ok(exp) => parsed.push((entry.value.clone(), exp)),
                Err(e) => {
                    invalid = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = invalid {
            diag.record_error(&def.id, e);
            continue;
        }

        debug!(id = %def.id, kind = %def.kind, values = parsed.len(), "rule data loaded");
        let table = tables.entry(def.id).or_default();
        for (value, exp) in parsed {
            table.insert(value, exp);
        }
    }

    for table in tables.values_mut() {
        table.finish();
    }
    tables
}
