//! Collaborator interfaces consumed by the deployer and the verifier.
//!
//! Both traits are implemented against real services ([`crate::JsonRpcClient`],
//! [`crate::EtherscanClient`]) and can be replaced by in-memory doubles in tests.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::{DeploymentError, SourceMetadata};

/// A submitted, not yet confirmed, contract-creation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeployment {
    pub tx_hash: B256,
    pub from: Address,
}

/// The parts of a transaction receipt the deployer cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// A deployment that reached the requested confirmation depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDeployment {
    pub address: Address,
    pub receipt: TransactionReceipt,
}

/// Account access, transaction submission and confirmation polling.
pub trait NetworkClient: Send + Sync {
    /// The account deployments are sent from.
    fn deployer_account(&self) -> impl Future<Output = Result<Address, DeploymentError>> + Send;

    /// Submit a contract-creation transaction with `bytecode ++ constructor_args` as input.
    fn submit_deployment(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
        from: Address,
    ) -> impl Future<Output = Result<PendingDeployment, DeploymentError>> + Send;

    /// Block until the transaction has `confirmations` confirmations, failing with
    /// [`DeploymentError::Timeout`] after `timeout`.
    fn wait_confirmations(
        &self,
        pending: &PendingDeployment,
        confirmations: u64,
        timeout: Duration,
    ) -> impl Future<Output = Result<ConfirmedDeployment, DeploymentError>> + Send;

    /// Whether runtime code is present at `address`.
    fn code_exists(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<bool, DeploymentError>> + Send;
}

/// A source verification request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    pub chain_id: Option<u64>,
    pub source: SourceMetadata,
    /// ABI-encoded constructor arguments, identical to the ones deployed.
    pub constructor_args: Bytes,
}

/// Normalised explorer answer to a verification submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ExplorerStatus {
    /// Source matched and published.
    Verified,
    /// The contract was verified before this submission.
    AlreadyVerified,
    /// Request throttled (HTTP 429 or an explicit rate-limit message).
    RateLimited,
    /// Contract not indexed yet, or the verification job is still queued.
    Pending,
    /// Explorer-side failure (HTTP 5xx).
    Unavailable,
    /// The request itself is wrong: bad arguments, unknown contract, invalid API key.
    Rejected,
}

impl ExplorerStatus {
    /// Whether resubmitting later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Pending | Self::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerResponse {
    pub status: ExplorerStatus,
    pub message: String,
}

impl ExplorerResponse {
    pub fn new(status: ExplorerStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Block explorer verification endpoint.
///
/// Errors are transport failures (connection reset, unparsable body) and are treated as
/// transient by the verifier; explorer-level outcomes are reported through [`ExplorerStatus`].
pub trait ExplorerClient: Send + Sync {
    fn submit_verification(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = anyhow::Result<ExplorerResponse>> + Send;
}

/// No explorer configured for the network: every submission is rejected.
impl<E: ExplorerClient> ExplorerClient for Option<E> {
    async fn submit_verification(
        &self,
        request: &VerificationRequest,
    ) -> anyhow::Result<ExplorerResponse> {
        match self {
            Some(explorer) => explorer.submit_verification(request).await,
            None => Ok(ExplorerResponse::new(
                ExplorerStatus::Rejected,
                "no explorer configured for this network",
            )),
        }
    }
}
