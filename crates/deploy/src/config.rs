//! Project configuration (`Shipwright.toml`).
//!
//! The configuration is loaded once at the start of a run and is read-only afterwards. Values
//! come from the TOML file and can be overridden with `SHIPWRIGHT_`-prefixed environment
//! variables, using `__` to separate nested keys (e.g.
//! `SHIPWRIGHT_NETWORKS__SEPOLIA__BLOCK_CONFIRMATIONS=3`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfigError, DeploymentUnit, unit::load_units_from_dir};

/// The default name for the configuration file.
pub const CONFIG_FILENAME: &str = "Shipwright.toml";

/// Prefix of environment variables overriding configuration values.
pub const ENV_PREFIX: &str = "SHIPWRIGHT_";

/// Default environment variable holding the block explorer API key.
pub const DEFAULT_API_KEY_ENV: &str = "ETHERSCAN_API_KEY";

/// Default RPC endpoint for local development chains.
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default time to wait for the required confirmations of a deployment.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

fn default_development_chains() -> Vec<String> {
    vec!["hardhat".to_string(), "localhost".to_string()]
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_local_rpc_url() -> Url {
    Url::parse(DEFAULT_LOCAL_RPC_URL).expect("default local RPC URL is valid")
}

/// Filesystem locations used by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the compiled artifacts tree.
    pub artifacts: PathBuf,
    /// Root of the persisted deployment records.
    pub deployments: PathBuf,
    /// Directory holding one deploy script (`*.toml`) per contract.
    pub deploy: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("artifacts"),
            deployments: PathBuf::from("deployments"),
            deploy: PathBuf::from("deploy"),
        }
    }
}

/// Block explorer used to verify contracts on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Verification API endpoint.
    pub api_url: Url,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Configuration of a single target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of the network.
    #[serde(default = "default_local_rpc_url")]
    pub rpc_url: Url,
    /// Chain ID, forwarded to the explorer.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Confirmations to wait for before a deployment is considered durable. Defaults to 1.
    #[serde(default)]
    pub block_confirmations: Option<u64>,
    /// Block explorer used for source verification.
    #[serde(default)]
    pub explorer: Option<ExplorerConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_local_rpc_url(),
            chain_id: None,
            block_confirmations: None,
            explorer: None,
        }
    }
}

/// Retry policy for source verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Maximum number of submissions, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound of a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound of the time spent verifying a single unit, in seconds.
    pub max_total_wait_secs: u64,
    /// Status checks of a queued explorer job within one attempt.
    pub status_polls: u32,
    pub status_poll_interval_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            max_total_wait_secs: 180,
            status_polls: 5,
            status_poll_interval_ms: 3_000,
        }
    }
}

impl VerificationConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

/// Top-level project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    /// Deployer account. When unset, the first account exposed by the node is used.
    #[serde(default)]
    pub deployer: Option<Address>,
    /// Ephemeral networks on which verification never happens.
    #[serde(default = "default_development_chains")]
    pub development_chains: Vec<String>,
    /// Maximum time to wait for the required confirmations of a deployment.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Interval between transaction receipt polls, in milliseconds.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Known networks, by name.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Profile used for networks missing from `networks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<NetworkConfig>,
    /// Units declared inline, run before the deploy scripts.
    #[serde(default)]
    pub units: Vec<DeploymentUnit>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            deployer: None,
            development_chains: default_development_chains(),
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            verification: VerificationConfig::default(),
            networks: BTreeMap::new(),
            default_profile: None,
            units: Vec::new(),
        }
    }
}

impl ProjectConfig {
    /// Load the configuration from a file (or a directory containing [`CONFIG_FILENAME`]) merged
    /// with environment overrides.
    ///
    /// Relative paths are resolved against the directory holding the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        if !config_path.exists() {
            return Err(ConfigError::Invalid(format!(
                "Configuration file not found: {}",
                config_path.display()
            )));
        }

        let mut config: Self = Figment::new()
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        if let Some(root) = config_path.parent() {
            config.paths.rebase(root);
        }

        config.validate()?;

        tracing::info!(
            path = %config_path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verification.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "verification.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_timeout_secs must be positive".to_string(),
            ));
        }
        if let Some(name) = self.networks.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "network name '{name}' must not be empty"
            )));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Configuration of a network.
    ///
    /// Development chains without an explicit entry get a local endpoint; only other names fall
    /// back to the default profile.
    pub fn network(&self, name: &str) -> Option<NetworkConfig> {
        if let Some(network) = self.networks.get(name) {
            return Some(network.clone());
        }
        if self.is_development_chain(name) {
            return Some(NetworkConfig::default());
        }
        self.default_profile.clone()
    }

    pub fn is_development_chain(&self, name: &str) -> bool {
        self.development_chains.iter().any(|chain| chain == name)
    }

    /// Resolve the explorer API key of every network from the environment.
    ///
    /// This is the only place credentials are read; the result is passed around explicitly.
    pub fn resolve_credentials(&self) -> Credentials {
        self.resolve_credentials_with(|var| std::env::var(var).ok())
    }

    /// Same as [`Self::resolve_credentials`] with a custom variable lookup.
    pub fn resolve_credentials_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Credentials {
        let mut keys = BTreeMap::new();
        let explorers = self
            .networks
            .iter()
            .map(|(name, network)| (Some(name.clone()), network))
            .chain(self.default_profile.iter().map(|network| (None, network)));

        for (name, network) in explorers {
            let Some(explorer) = &network.explorer else {
                continue;
            };
            match lookup(&explorer.api_key_env).filter(|key| !key.trim().is_empty()) {
                Some(key) => {
                    keys.insert(name, key);
                }
                None => {
                    tracing::debug!(
                        network = name.as_deref().unwrap_or("<default>"),
                        env = %explorer.api_key_env,
                        "No explorer API key configured"
                    );
                }
            }
        }

        Credentials { keys }
    }

    /// Inline units followed by the deploy scripts, in declared order.
    pub fn deployment_units(&self) -> Result<Vec<DeploymentUnit>, ConfigError> {
        let mut units = self.units.clone();
        let scripts = load_units_from_dir(&self.paths.deploy).map_err(|source| {
            ConfigError::Units {
                path: self.paths.deploy.display().to_string(),
                source,
            }
        })?;
        units.extend(scripts);
        Ok(units)
    }
}

impl PathsConfig {
    fn rebase(&mut self, root: &Path) {
        for path in [&mut self.artifacts, &mut self.deployments, &mut self.deploy] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

/// Explorer API keys resolved at run start, keyed by network name (`None` for the default
/// profile).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    keys: BTreeMap<Option<String>, String>,
}

impl Credentials {
    /// API key for a network, falling back to the default profile's key when the network has no
    /// explicit configuration.
    pub fn api_key(&self, config: &ProjectConfig, network: &str) -> Option<&str> {
        if config.networks.contains_key(network) {
            self.keys.get(&Some(network.to_string()))
        } else {
            self.keys.get(&None)
        }
        .map(String::as_str)
    }

    /// API key of the default profile's explorer.
    pub fn default_api_key(&self) -> Option<&str> {
        self.keys.get(&None).map(String::as_str)
    }
}
