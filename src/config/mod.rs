use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    /// Address whose questions are watched (the subgraph's `user` field).
    #[serde(default)]
    pub address: String,
    /// Oracle contract that receives `submitAnswer`.
    #[serde(default = "default_oracle_address")]
    pub oracle_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint - loaded from env WATCHER_RPC_URL
    #[serde(default)]
    pub rpc_url: String,
    /// Hex private key - loaded from env WATCHER_PRIVATE_KEY only
    #[serde(skip)]
    pub private_key: String,
    /// Expected chain id. Checked against the node at startup when set.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Bond used when the current bond is zero, in wei (decimal or 0x hex).
    #[serde(default = "default_min_bond_wei")]
    pub min_bond_wei: String,
    /// Answer posted when challenging (bytes32 hex).
    #[serde(default = "default_challenge_answer")]
    pub challenge_answer: String,
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// The Graph gateway base URL
    #[serde(default = "default_graph_gateway")]
    pub gateway_url: String,
    #[serde(default = "default_subgraph_id")]
    pub subgraph_id: String,
    /// Gateway API key - loaded from env WATCHER_QUERY_API_KEY
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    /// IPFS HTTP gateway base URL
    #[serde(default = "default_ipfs_gateway")]
    pub gateway_url: String,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorBackendKind {
    Llm,
    Rules,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_backend")]
    pub backend: EvaluatorBackendKind,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Inference API key - loaded from env WATCHER_LLM_API_KEY
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on any single query / fetch / evaluate call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Upper bound on one challenge submission, including mining.
    #[serde(default = "default_challenge_timeout")]
    pub challenge_timeout_secs: u64,
    #[serde(default = "default_max_processed")]
    pub max_processed: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_oracle_address() -> String {
    // Reality.eth v3 on Sepolia
    "0xaf33DcB6E8c5c4D9dDF579f53031b514d19449CA".to_string()
}
fn default_min_bond_wei() -> String {
    "10000000000000000".to_string()
}
fn default_challenge_answer() -> String {
    format!("{}", B256::ZERO)
}
fn default_receipt_timeout() -> u64 {
    120
}
fn default_graph_gateway() -> String {
    "https://gateway.thegraph.com".to_string()
}
fn default_subgraph_id() -> String {
    "F3XjWNiNFUTbZhNQjXuhP7oDug2NaPwMPZ5XCRx46h5U".to_string()
}
fn default_ipfs_gateway() -> String {
    "https://ipfs.io".to_string()
}
fn default_max_document_bytes() -> usize {
    1024 * 1024
}
fn default_backend() -> EvaluatorBackendKind {
    EvaluatorBackendKind::Llm
}
fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_call_timeout() -> u64 {
    30
}
fn default_challenge_timeout() -> u64 {
    180
}
fn default_max_processed() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_state_path() -> PathBuf {
    PathBuf::from("processed_hashes.json")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            private_key: String::new(),
            chain_id: None,
            min_bond_wei: default_min_bond_wei(),
            challenge_answer: default_challenge_answer(),
            receipt_timeout_secs: default_receipt_timeout(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_graph_gateway(),
            subgraph_id: default_subgraph_id(),
            api_key: String::new(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_ipfs_gateway(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            call_timeout_secs: default_call_timeout(),
            challenge_timeout_secs: default_challenge_timeout(),
            max_processed: default_max_processed(),
            persist: true,
            state_path: default_state_path(),
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

/// Settings that passed validation, in the types the components consume.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub registry: Address,
    pub oracle: Address,
    pub min_bond: U256,
    pub challenge_answer: B256,
    pub poll_interval: Duration,
    pub call_timeout: Duration,
    pub challenge_timeout: Duration,
    pub receipt_timeout: Duration,
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(contents)?;
        config.overlay_env();
        Ok(config)
    }

    /// Env-only config (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            registry: RegistryConfig {
                address: String::new(),
                oracle_address: default_oracle_address(),
            },
            chain: ChainConfig::default(),
            query: QueryConfig::default(),
            content: ContentConfig::default(),
            evaluator: EvaluatorConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        };
        if let Ok(addr) = std::env::var("WATCHER_REGISTRY_ADDRESS") {
            config.registry.address = addr;
        }
        if let Ok(secs) = std::env::var("WATCHER_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.watcher.poll_interval_secs = secs;
            }
        }
        config.overlay_env();
        config
    }

    // Secrets never live in the config file.
    fn overlay_env(&mut self) {
        if let Ok(url) = std::env::var("WATCHER_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(key) = std::env::var("WATCHER_PRIVATE_KEY") {
            self.chain.private_key = key;
        }
        if let Ok(key) = std::env::var("WATCHER_QUERY_API_KEY") {
            self.query.api_key = key;
        }
        if let Ok(key) = std::env::var("WATCHER_LLM_API_KEY") {
            self.evaluator.api_key = key;
        }
    }

    /// Check everything that must be fatal at startup.
    pub fn validate(&self) -> Result<ResolvedSettings, ConfigError> {
        if self.chain.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url (WATCHER_RPC_URL)"));
        }
        if self.chain.private_key.trim().is_empty() {
            return Err(ConfigError::Missing("WATCHER_PRIVATE_KEY"));
        }
        if self.registry.address.trim().is_empty() {
            return Err(ConfigError::Missing("registry.address"));
        }
        if self.watcher.max_processed == 0 {
            return Err(ConfigError::Invalid {
                field: "watcher.max_processed",
                reason: "must be at least 1".to_string(),
            });
        }
        let llm = self.evaluator.backend == EvaluatorBackendKind::Llm;
        if llm && self.evaluator.api_key.is_empty() {
            return Err(ConfigError::Missing("WATCHER_LLM_API_KEY (evaluator.backend = \"llm\")"));
        }

        let registry = parse_field("registry.address", &self.registry.address, Address::from_str)?;
        let oracle = parse_field(
            "registry.oracle_address",
            &self.registry.oracle_address,
            Address::from_str,
        )?;
        let min_bond = parse_field("chain.min_bond_wei", &self.chain.min_bond_wei, U256::from_str)?;
        let challenge_answer = parse_field(
            "chain.challenge_answer",
            &self.chain.challenge_answer,
            B256::from_str,
        )?;

        Ok(ResolvedSettings {
            registry,
            oracle,
            min_bond,
            challenge_answer,
            poll_interval: Duration::from_secs(self.watcher.poll_interval_secs.max(1)),
            call_timeout: Duration::from_secs(self.watcher.call_timeout_secs.max(1)),
            challenge_timeout: Duration::from_secs(self.watcher.challenge_timeout_secs.max(1)),
            receipt_timeout: Duration::from_secs(self.chain.receipt_timeout_secs.max(1)),
        })
    }

    /// Persisted state path, or `None` when running in-memory only.
    pub fn state_path(&self) -> Option<&Path> {
        self.watcher
            .persist
            .then_some(self.watcher.state_path.as_path())
    }
}

fn parse_field<T, E: std::fmt::Display>(
    field: &'static str,
    raw: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ConfigError> {
    parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}
