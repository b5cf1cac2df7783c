//! In-memory collaborators shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes};

use crate::{
    DeploymentError, NetworkProfile, RetryPolicy, SourceMetadata,
    client::{
        ConfirmedDeployment, ExplorerClient, ExplorerResponse, ExplorerStatus, NetworkClient,
        PendingDeployment, TransactionReceipt, VerificationRequest,
    },
};

pub(crate) fn profile(name: &str, is_ephemeral: bool, has_credentials: bool) -> NetworkProfile {
    NetworkProfile {
        name: name.to_string(),
        is_ephemeral,
        required_confirmations: 1,
        has_verification_credentials: has_credentials,
        chain_id: Some(11155111),
    }
}

pub(crate) fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_total_wait: Duration::from_secs(5),
    }
}

pub(crate) fn source_metadata() -> SourceMetadata {
    SourceMetadata {
        fully_qualified_name: "contracts/Token.sol:Token".to_string(),
        compiler_version: "v0.8.24+commit.e11b9ed9".to_string(),
        standard_json_input: serde_json::json!({ "language": "Solidity", "sources": {} }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ChainBehaviour {
    #[default]
    Confirm,
    Revert,
    Timeout,
    /// Never confirms; only cancellation ends the wait.
    Stall,
}

/// Network client minting a fresh address per submission.
#[derive(Debug, Default)]
pub(crate) struct MockNetworkClient {
    behaviour: ChainBehaviour,
    submissions: AtomicU32,
    confirmations: Mutex<Vec<u64>>,
    /// Set when the chain was restarted and lost every deployed contract.
    reset: AtomicBool,
    code_checks: AtomicU32,
}

impl MockNetworkClient {
    pub(crate) fn reverting(mut self) -> Self {
        self.behaviour = ChainBehaviour::Revert;
        self
    }

    pub(crate) fn timing_out(mut self) -> Self {
        self.behaviour = ChainBehaviour::Timeout;
        self
    }

    pub(crate) fn stalling(mut self) -> Self {
        self.behaviour = ChainBehaviour::Stall;
        self
    }

    /// Drop all deployed code, as a restarted development node does.
    pub(crate) fn reset_chain(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub(crate) fn code_checks(&self) -> u32 {
        self.code_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    pub(crate) fn requested_confirmations(&self) -> Vec<u64> {
        self.confirmations.lock().expect("poisoned").clone()
    }
}

impl NetworkClient for MockNetworkClient {
    async fn deployer_account(&self) -> Result<Address, DeploymentError> {
        Ok(Address::repeat_byte(0xde))
    }

    async fn submit_deployment(
        &self,
        _bytecode: &Bytes,
        _constructor_args: &Bytes,
        from: Address,
    ) -> Result<PendingDeployment, DeploymentError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PendingDeployment {
            tx_hash: B256::with_last_byte(n as u8),
            from,
        })
    }

    async fn wait_confirmations(
        &self,
        pending: &PendingDeployment,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ConfirmedDeployment, DeploymentError> {
        self.confirmations
            .lock()
            .expect("poisoned")
            .push(confirmations);

        match self.behaviour {
            ChainBehaviour::Confirm => Ok(ConfirmedDeployment {
                address: Address::with_last_byte(pending.tx_hash[31]),
                receipt: TransactionReceipt {
                    tx_hash: pending.tx_hash,
                    block_number: 100 + u64::from(pending.tx_hash[31]),
                    gas_used: 500_000,
                    contract_address: Some(Address::with_last_byte(pending.tx_hash[31])),
                    success: true,
                },
            }),
            ChainBehaviour::Revert => Err(DeploymentError::Reverted {
                tx_hash: pending.tx_hash,
            }),
            ChainBehaviour::Timeout => Err(DeploymentError::Timeout {
                tx_hash: pending.tx_hash,
                confirmations,
                timeout,
            }),
            ChainBehaviour::Stall => std::future::pending().await,
        }
    }

    async fn code_exists(&self, _address: Address) -> Result<bool, DeploymentError> {
        self.code_checks.fetch_add(1, Ordering::SeqCst);
        Ok(!self.reset.load(Ordering::SeqCst))
    }
}

/// Explorer replaying a script of statuses, repeating the last one once exhausted.
#[derive(Debug)]
pub(crate) struct MockExplorer {
    script: Mutex<VecDeque<ExplorerStatus>>,
    last: ExplorerStatus,
    transport_errors: AtomicU32,
    calls: AtomicU32,
}

impl MockExplorer {
    pub(crate) fn always(status: ExplorerStatus) -> Self {
        Self::scripted([status])
    }

    pub(crate) fn scripted(statuses: impl IntoIterator<Item = ExplorerStatus>) -> Self {
        let script: VecDeque<_> = statuses.into_iter().collect();
        let last = script.back().copied().unwrap_or(ExplorerStatus::Verified);
        Self {
            script: Mutex::new(script),
            last,
            transport_errors: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `n` calls at the transport level.
    pub(crate) fn with_transport_errors(self, n: u32) -> Self {
        self.transport_errors.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExplorerClient for MockExplorer {
    async fn submit_verification(
        &self,
        _request: &VerificationRequest,
    ) -> anyhow::Result<ExplorerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .transport_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("connection reset by peer");
        }

        let status = self
            .script
            .lock()
            .expect("poisoned")
            .pop_front()
            .unwrap_or(self.last);
        Ok(ExplorerResponse::new(status, status.to_string()))
    }
}
