//! shipwright-deploy - Deployment library for smart contracts.
//!
//! This crate deploys compiled contract artifacts to a target network, waits for confirmations,
//! records every deployment so that reruns are idempotent, and submits the deployed contracts
//! for source verification on persistent networks.

mod cancel;
pub use cancel::{CancelHandle, Cancellation, cancellation};

pub mod client;
pub use client::{
    ConfirmedDeployment, ExplorerClient, ExplorerResponse, ExplorerStatus, NetworkClient,
    PendingDeployment, TransactionReceipt, VerificationRequest,
};

pub mod config;
pub use config::{
    CONFIG_FILENAME, Credentials, ExplorerConfig, NetworkConfig, PathsConfig, ProjectConfig,
    VerificationConfig,
};

mod deployer;
pub use deployer::{DeployOutcome, Deployer, encode_constructor_args};

pub mod deployment_hash;

mod error;
pub use error::{ConfigError, DeploymentError, VerificationError};

mod explorer;
pub use explorer::{EtherscanClient, classify_message};

mod network;
pub use network::{DEFAULT_REQUIRED_CONFIRMATIONS, NetworkClassifier, NetworkProfile};

mod orchestrator;
pub use orchestrator::{
    Orchestrator, OrchestratorOptions, RunSummary, SkipReason, UnitReport, UnitState,
    VerificationOutcome,
};

mod registry;
pub use registry::{Artifact, ArtifactRegistry, DeploymentRecord, SourceMetadata};

mod rpc;
pub use rpc::JsonRpcClient;

mod unit;
pub use unit::{ConstructorArg, DeploymentUnit, load_units_from_dir};

mod verifier;
pub use verifier::{RetryPolicy, VerificationAttempt, VerificationStatus, Verifier};

#[cfg(test)]
mod testing;
