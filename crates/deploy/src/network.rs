//! Network classification: which networks are ephemeral, how many confirmations they need and
//! whether contracts deployed there can be verified.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ProjectConfig, config::Credentials};

/// Confirmations required when a network does not override them.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 1;

/// Deployment policy of a target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    /// Transient, resettable network (in-process simulation, local node).
    pub is_ephemeral: bool,
    pub required_confirmations: u64,
    /// Whether an explorer API key is available for this network.
    pub has_verification_credentials: bool,
    pub chain_id: Option<u64>,
}

impl NetworkProfile {
    /// Verification happens only on persistent networks with explorer credentials.
    pub fn requires_verification(&self) -> bool {
        !self.is_ephemeral && self.has_verification_credentials
    }
}

/// Static lookup of [`NetworkProfile`]s, built once per run from the project configuration.
#[derive(Debug, Clone)]
pub struct NetworkClassifier {
    config: ProjectConfig,
    development_chains: BTreeSet<String>,
    credentialed: BTreeSet<String>,
    default_credentialed: bool,
}

impl NetworkClassifier {
    pub fn new(config: &ProjectConfig, credentials: &Credentials) -> Self {
        let credentialed = config
            .networks
            .keys()
            .filter(|name| credentials.api_key(config, name).is_some())
            .cloned()
            .collect();

        let default_credentialed = config.default_profile.as_ref().is_some_and(|profile| {
            profile.explorer.is_some() && credentials.default_api_key().is_some()
        });

        Self {
            config: config.clone(),
            development_chains: config.development_chains.iter().cloned().collect(),
            credentialed,
            default_credentialed,
        }
    }

    /// Classify a network by name.
    pub fn classify(&self, network_name: &str) -> Result<NetworkProfile, ConfigError> {
        if network_name.trim().is_empty() {
            return Err(ConfigError::EmptyNetworkName);
        }

        let network = self
            .config
            .network(network_name)
            .ok_or_else(|| ConfigError::UnknownNetwork(network_name.to_string()))?;

        let has_verification_credentials = if self.config.networks.contains_key(network_name) {
            self.credentialed.contains(network_name)
        } else {
            !self.development_chains.contains(network_name) && self.default_credentialed
        };

        Ok(NetworkProfile {
            name: network_name.to_string(),
            is_ephemeral: self.development_chains.contains(network_name),
            required_confirmations: network
                .block_confirmations
                .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS),
            has_verification_credentials,
            chain_id: network.chain_id,
        })
    }
}
