//! Deployment configuration for a ledger.
//!
//! Environment variables:
//! - `PAYABLES_CLIENT` (required): UUID of the only account allowed to pay.
//! - `PAYABLES_LOG` (optional): default tracing filter when `RUST_LOG` is unset.

use anyhow::Context;
use serde::Deserialize;

use payables_core::AccountId;

pub const CLIENT_VAR: &str = "PAYABLES_CLIENT";
pub const LOG_VAR: &str = "PAYABLES_LOG";

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PayablesConfig {
    /// The designated client; fixed for the ledger's lifetime.
    pub client: AccountId,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl PayablesConfig {
    pub fn new(client: AccountId) -> Self {
        Self {
            client,
            log_filter: default_log_filter(),
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its
    /// value (if set).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let raw_client = lookup(CLIENT_VAR).with_context(|| format!("{CLIENT_VAR} must be set"))?;
        let client = raw_client
            .parse::<AccountId>()
            .with_context(|| format!("{CLIENT_VAR} is not a valid account id"))?;

        let log_filter = lookup(LOG_VAR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(default_log_filter);

        Ok(Self { client, log_filter })
    }

    /// Parse a JSON document such as `{"client": "<uuid>", "log_filter": "debug"}`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid payables config document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn reads_client_and_defaults_log_filter() {
        let client = AccountId::new();
        let config = PayablesConfig::from_lookup(lookup_from(&[(
            CLIENT_VAR,
            client.to_string().as_str(),
        )]))
        .unwrap();

        assert_eq!(config, PayablesConfig::new(client));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn log_filter_can_be_overridden() {
        let client = AccountId::new();
        let config = PayablesConfig::from_lookup(lookup_from(&[
            (CLIENT_VAR, client.to_string().as_str()),
            (LOG_VAR, "payables_ledger=debug"),
        ]))
        .unwrap();

        assert_eq!(config.log_filter, "payables_ledger=debug");
    }

    #[test]
    fn missing_client_is_an_error() {
        let err = PayablesConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains(CLIENT_VAR));
    }

    #[test]
    fn malformed_client_is_an_error() {
        let err = PayablesConfig::from_lookup(lookup_from(&[(
            CLIENT_VAR,
            "0x912643AbC9C91Fea9E1Fdf9CB7ED3763885BFAbE",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("not a valid account id"));
    }

    #[test]
    fn parses_json_document() {
        let client = AccountId::new();
        let json = format!(r#"{{"client": "{client}", "log_filter": "warn"}}"#);

        let config = PayablesConfig::from_json(&json).unwrap();

        assert_eq!(config.client, client);
        assert_eq!(config.log_filter, "warn");
    }
}
