//! Configuration: TOML file with environment-variable overlay, plus
//! the immutable per-chain registry of Reality.eth deployments.
//!
//! The registry is built once at startup from built-in entries and any
//! `[chains.<id>]` overrides in the config file; after that it is
//! read-only. A chain id without an entry means "unsupported" and is a
//! hard error when selected.

use crate::subgraph;
use alloy::primitives::{address, Address};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("chain key {0:?} is not a numeric chain id")]
    InvalidChainKey(String),
    #[error("invalid address {value:?} for chain {chain_id}")]
    InvalidAddress { chain_id: u64, value: String },
    #[error("chain {chain_id} has no Reality.eth deployment configured")]
    UnsupportedChain { chain_id: u64 },
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-chain overrides, keyed by decimal chain id.
    #[serde(default)]
    pub chains: HashMap<String, ChainOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// HTTP RPC endpoint - loaded from env REALITY_RPC_URL
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// WebSocket RPC endpoint (block subscriptions) - env REALITY_WS_URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Skip the subgraph and read everything from the contract - env
    /// REALITY_PREFER_DECENTRALIZATION
    #[serde(default)]
    pub prefer_decentralization: bool,
    /// Question id to fetch/watch (hex bytes32) - env REALITY_QUESTION_ID
    #[serde(default)]
    pub question_id: Option<String>,
    /// Raw question text the question was created with - env REALITY_QUESTION
    #[serde(default)]
    pub question: Option<String>,
    /// Reality.eth template id the question uses - env REALITY_TEMPLATE_ID
    #[serde(default)]
    pub template_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// `[chains.<id>]` table entry: overrides or extends a built-in chain.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChainOverride {
    #[serde(default)]
    pub reality_address: Option<String>,
    #[serde(default)]
    pub arbitrator_address: Option<String>,
    #[serde(default)]
    pub subgraph_url: Option<String>,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}
fn default_ws_url() -> String {
    "ws://127.0.0.1:8545".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: default_ws_url(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            prefer_decentralization: false,
            question_id: None,
            question: None,
            template_id: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Env-only config (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.overlay_env();
        config
    }

    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("REALITY_RPC_URL") {
            self.node.rpc_url = url;
        }
        if let Ok(url) = std::env::var("REALITY_WS_URL") {
            self.node.ws_url = url;
        }
        if let Ok(id) = std::env::var("REALITY_QUESTION_ID") {
            self.fetch.question_id = Some(id);
        }
        if let Ok(text) = std::env::var("REALITY_QUESTION") {
            self.fetch.question = Some(text);
        }
        if let Ok(value) = std::env::var("REALITY_PREFER_DECENTRALIZATION") {
            self.fetch.prefer_decentralization =
                matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = std::env::var("REALITY_TEMPLATE_ID") {
            match value.parse() {
                Ok(id) => self.fetch.template_id = id,
                Err(_) => warn!(value = %value, "ignoring unparseable REALITY_TEMPLATE_ID"),
            }
        }
    }
}

/// Everything this layer needs to know about one chain.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub chain_id: u64,
    /// Reality.eth v3 contract.
    pub reality_address: Address,
    /// Trusted arbitrator bound to the oracle template, if deployed.
    pub arbitrator_address: Option<Address>,
    /// Subgraph endpoint; `None` forces on-chain reads.
    pub subgraph_url: Option<String>,
}

/// Immutable chain-id → deployment mapping, built once at startup.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: HashMap<u64, ChainSettings>,
}

impl ChainRegistry {
    /// Known Reality.eth v3 deployments. Sepolia deliberately has no
    /// subgraph entry, which exercises the on-chain fallback.
    pub fn builtin() -> Self {
        let mut chains = HashMap::new();
        for (chain_id, reality_address) in [
            (1u64, address!("5b7dd1e86623548af054a4985f7fc8ccbb554e2c")),
            (100, address!("e78996a233895be74a66f451f1019ca9734205cc")),
            (137, address!("60573b8dce539ae5bf9ad7932310668997ef0428")),
            (11155111, address!("af33dcb6e8c5c4d9ddf579f53031b514d19449ca")),
        ] {
            chains.insert(
                chain_id,
                ChainSettings {
                    chain_id,
                    reality_address,
                    arbitrator_address: None,
                    subgraph_url: subgraph::subgraph_url(chain_id).map(str::to_string),
                },
            );
        }
        Self { chains }
    }

    /// Built-in entries extended/overridden by `[chains.<id>]` tables.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();
        for (key, entry) in &config.chains {
            let chain_id: u64 = key
                .parse()
                .map_err(|_| ConfigError::InvalidChainKey(key.clone()))?;

            let parse_addr = |value: &str| -> Result<Address, ConfigError> {
                value.parse().map_err(|_| ConfigError::InvalidAddress {
                    chain_id,
                    value: value.to_string(),
                })
            };

            let existing = registry.chains.get(&chain_id);
            let reality_address = match (&entry.reality_address, existing) {
                (Some(value), _) => parse_addr(value)?,
                (None, Some(settings)) => settings.reality_address,
                (None, None) => {
                    // An override for an unknown chain must at least
                    // name the contract.
                    return Err(ConfigError::UnsupportedChain { chain_id });
                }
            };
            let arbitrator_address = match &entry.arbitrator_address {
                Some(value) => Some(parse_addr(value)?),
                None => existing.and_then(|s| s.arbitrator_address),
            };
            let subgraph_url = entry
                .subgraph_url
                .clone()
                .or_else(|| existing.and_then(|s| s.subgraph_url.clone()));

            registry.chains.insert(
                chain_id,
                ChainSettings {
                    chain_id,
                    reality_address,
                    arbitrator_address,
                    subgraph_url,
                },
            );
        }
        Ok(registry)
    }

    pub fn settings(&self, chain_id: u64) -> Option<&ChainSettings> {
        self.chains.get(&chain_id)
    }

    /// Like [`settings`](Self::settings) but an unsupported chain is a
    /// hard error with an explicit message.
    pub fn require(&self, chain_id: u64) -> Result<&ChainSettings, ConfigError> {
        self.settings(chain_id)
            .ok_or(ConfigError::UnsupportedChain { chain_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_known_chains() {
        let registry = ChainRegistry::builtin();
        assert!(registry.settings(1).is_some());
        assert!(registry.settings(100).is_some());
        let sepolia = registry.require(11155111).unwrap();
        assert!(sepolia.subgraph_url.is_none());
        assert!(matches!(
            registry.require(31337),
            Err(ConfigError::UnsupportedChain { chain_id: 31337 })
        ));
    }

    #[test]
    fn config_overrides_extend_the_registry() {
        let config: Config = toml::from_str(
            r#"
            [chains.31337]
            reality_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
            subgraph_url = "http://localhost:8000/subgraphs/name/realityeth-local"

            [chains.100]
            subgraph_url = "https://example.invalid/custom-gnosis"
            "#,
        )
        .unwrap();

        let registry = ChainRegistry::from_config(&config).unwrap();
        let local = registry.require(31337).unwrap();
        assert_eq!(
            local.subgraph_url.as_deref(),
            Some("http://localhost:8000/subgraphs/name/realityeth-local")
        );

        let gnosis = registry.require(100).unwrap();
        assert_eq!(
            gnosis.subgraph_url.as_deref(),
            Some("https://example.invalid/custom-gnosis")
        );
        // The built-in contract address survives a partial override.
        assert_eq!(
            gnosis.reality_address,
            ChainRegistry::builtin().require(100).unwrap().reality_address
        );
    }

    #[test]
    fn env_overlay_sets_routing_preference_and_template() {
        std::env::set_var("REALITY_PREFER_DECENTRALIZATION", "true");
        std::env::set_var("REALITY_TEMPLATE_ID", "2");
        let config = Config::from_env();
        std::env::remove_var("REALITY_PREFER_DECENTRALIZATION");
        std::env::remove_var("REALITY_TEMPLATE_ID");

        assert!(config.fetch.prefer_decentralization);
        assert_eq!(config.fetch.template_id, 2);
    }

    #[test]
    fn override_for_unknown_chain_needs_an_address() {
        let config: Config = toml::from_str(
            r#"
            [chains.31337]
            subgraph_url = "http://localhost:8000"
            "#,
        )
        .unwrap();
        assert!(matches!(
            ChainRegistry::from_config(&config),
            Err(ConfigError::UnsupportedChain { chain_id: 31337 })
        ));
    }

    #[test]
    fn bad_override_address_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [chains.31337]
            reality_address = "not-an-address"
            "#,
        )
        .unwrap();
        assert!(matches!(
            ChainRegistry::from_config(&config),
            Err(ConfigError::InvalidAddress { chain_id: 31337, .. })
        ));
    }
}
