use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use ipnet::IpNet;
use regex::{Regex, RegexBuilder};

use super::rule_data::{parse_network, RuleData};
use super::ruleset::ParametersDef;

/// A compiled condition operator.
#[derive(Debug, Clone)]
pub(crate) enum Operator {
    Regex {
        regex: Regex,
        pattern: String,
        min_length: usize,
    },
    Phrase(Vec<String>),
    Exact(HashSet<String>),
    ExactData(String),
    Ip(Vec<IpNet>),
    IpData(String),
}

impl Operator {
    pub fn parse(name: &str, params: &ParametersDef) -> Result<Self, String> {
        match name {
            "match_regex" => {
                let pattern = params
                    .regex
                    .clone()
                    .ok_or_else(|| "missing key 'regex'".to_string())?;
                let regex = RegexBuilder::new(&pattern)
                    .case_insensitive(!params.options.case_sensitive)
                    .build()
                    .map_err(|e| format!("invalid regular expression: {e}"))?;
                Ok(Operator::Regex {
                    regex,
                    pattern,
                    min_length: params.options.min_length,
                })
            }
            "phrase_match" => params
                .list
                .clone()
                .map(Operator::Phrase)
                .ok_or_else(|| "missing key 'list'".to_string()),
            "exact_match" => match (&params.list, &params.data) {
                (Some(list), _) => Ok(Operator::Exact(list.iter().cloned().collect())),
                (None, Some(data)) => Ok(Operator::ExactData(data.clone())),
                (None, None) => Err("missing key 'list' or 'data'".to_string()),
            },
            "ip_match" => match (&params.list, &params.data) {
                (Some(list), _) => list
                    .iter()
                    .map(|v| parse_network(v).ok_or_else(|| format!("invalid ip address: {v}")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Operator::Ip),
                (None, Some(data)) => Ok(Operator::IpData(data.clone())),
                (None, None) => Err("missing key 'list' or 'data'".to_string()),
            },
            other => Err(format!("unknown operator: {other}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Regex { .. } => "match_regex",
            Operator::Phrase(_) => "phrase_match",
            Operator::Exact(_) | Operator::ExactData(_) => "exact_match",
            Operator::Ip(_) | Operator::IpData(_) => "ip_match",
        }
    }

    /// What gets reported as `operator_value` in a match record.
    pub fn value(&self) -> &str {
        match self {
            Operator::Regex { pattern, .. } => pattern,
            _ => "",
        }
    }

    /// Test one scalar. Returns the highlighted fragment on a match.
    pub fn matches(&self, candidate: &str, data: &HashMap<String, RuleData>, now: u64) -> Option<String> {
        match self {
            Operator::Regex {
                regex, min_length, ..
            } => {
                if candidate.len() < *min_length {
                    return None;
                }
                regex.find(candidate).map(|m| m.as_str().to_string())
            }
            Operator::Phrase(phrases) => phrases
                .iter()
                .find(|p| !p.is_empty() && candidate.contains(p.as_str()))
                .cloned(),
            Operator::Exact(values) => values.contains(candidate).then(|| candidate.to_string()),
            Operator::ExactData(id) => data
                .get(id)
                .filter(|table| table.contains(candidate, now))
                .map(|_| candidate.to_string()),
            Operator::Ip(networks) => {
                let ip = candidate.trim().parse::<IpAddr>().ok()?;
                networks
                    .iter()
                    .any(|net| net.contains(&ip))
                    .then(|| candidate.to_string())
            }
            Operator::IpData(id) => {
                let ip = candidate.trim().parse::<IpAddr>().ok()?;
                data.get(id)
                    .filter(|table| table.contains_ip(ip, now))
                    .map(|_| candidate.to_string())
            }
        }
    }
}
