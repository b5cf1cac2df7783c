//! Error taxonomy for a deployment run.
//!
//! - [`ConfigError`] is fatal to the whole run and surfaces before any transaction is sent.
//! - [`DeploymentError`] aborts a single deployment unit; the run moves on to the next unit.
//! - [`VerificationError`] is reported against a unit but never aborts the run.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, U256};

/// Invalid or missing configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Network name must not be empty")]
    EmptyNetworkName,
    #[error("Network '{0}' is not configured and no default profile exists")]
    UnknownNetwork(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to load configuration")]
    Load(#[from] Box<figment::Error>),
    #[error("Failed to load deployment units from {path}")]
    Units {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Failure of a single deployment unit.
#[derive(thiserror::Error, Debug)]
pub enum DeploymentError {
    #[error("Failed to resolve artifact for {contract}")]
    Artifact {
        contract: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Invalid constructor arguments for {contract}: {reason}")]
    ConstructorArgs { contract: String, reason: String },
    #[error("Deployment transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    #[error("Deployment transaction would revert: {0}")]
    WouldRevert(String),
    #[error("Timed out after {timeout:?} waiting for {confirmations} confirmation(s) of {tx_hash}")]
    Timeout {
        tx_hash: B256,
        confirmations: u64,
        timeout: Duration,
    },
    #[error("Account {account} has insufficient funds: balance {available} wei, required {required} wei")]
    InsufficientFunds {
        account: Address,
        available: U256,
        required: U256,
    },
    #[error("Deployment cancelled")]
    Cancelled,
    #[error("Network client failure")]
    Rpc(#[source] anyhow::Error),
    #[error("Failed to persist deployment record")]
    Registry(#[source] anyhow::Error),
}

/// Hard verification failure, as opposed to a failed [`crate::VerificationAttempt`].
#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error(
        "Constructor arguments do not match the deployed encoding (recorded hash {expected}, submitted hash {actual})"
    )]
    ConstructorArgsMismatch { expected: String, actual: String },
    #[error("Verification cancelled")]
    Cancelled,
    #[error("Failed to persist verification status")]
    Registry(#[source] anyhow::Error),
}
