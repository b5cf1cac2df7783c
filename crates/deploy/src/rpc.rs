//! JSON-RPC network client.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::{
    DeploymentError,
    client::{ConfirmedDeployment, NetworkClient, PendingDeployment, TransactionReceipt},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: U64,
    gas_used: U64,
    contract_address: Option<Address>,
    /// Absent on pre-byzantium chains.
    status: Option<U64>,
}

impl From<RpcReceipt> for TransactionReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.to::<u64>(),
            gas_used: receipt.gas_used.to::<u64>(),
            contract_address: receipt.contract_address,
            success: receipt.status.is_none_or(|status| status.to::<u64>() == 1),
        }
    }
}

/// Confirmations of a transaction mined in `block` when the chain head is `head`.
fn confirmation_depth(head: u64, block: u64) -> u64 {
    head.saturating_sub(block).saturating_add(1)
}

/// Network client sending transactions from node-managed (unlocked) accounts.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
    account: Option<Address>,
    poll_interval: Duration,
}

impl JsonRpcClient {
    pub fn new(url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client()?,
            url,
            account: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Use a fixed deployer account instead of the node's first account.
    pub fn with_account(mut self, account: Option<Address>) -> Self {
        self.account = account;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    async fn balance(&self, account: Address) -> Result<U256, DeploymentError> {
        self.call(
            "eth_getBalance",
            vec![serde_json::json!(account), serde_json::json!("latest")],
        )
        .await
        .map_err(DeploymentError::Rpc)
    }

    /// Map a node error to the deployment error taxonomy.
    async fn classify_error(&self, err: anyhow::Error, from: Address) -> DeploymentError {
        let message = format!("{err:#}").to_lowercase();
        if message.contains("insufficient funds") {
            let available = self.balance(from).await.unwrap_or_default();
            return DeploymentError::InsufficientFunds {
                account: from,
                available,
                required: U256::ZERO,
            };
        }
        if message.contains("revert") {
            return DeploymentError::WouldRevert(format!("{err:#}"));
        }
        DeploymentError::Rpc(err)
    }

    async fn poll_receipt(
        &self,
        pending: &PendingDeployment,
        confirmations: u64,
    ) -> Result<ConfirmedDeployment, DeploymentError> {
        loop {
            let receipt: Result<Option<RpcReceipt>, _> = self
                .call(
                    "eth_getTransactionReceipt",
                    vec![serde_json::json!(pending.tx_hash)],
                )
                .await;

            match receipt {
                Ok(Some(receipt)) => {
                    let receipt = TransactionReceipt::from(receipt);
                    if !receipt.success {
                        return Err(DeploymentError::Reverted {
                            tx_hash: pending.tx_hash,
                        });
                    }

                    match self.call::<U64>("eth_blockNumber", vec![]).await {
                        Ok(head) => {
                            let depth = confirmation_depth(head.to::<u64>(), receipt.block_number);
                            if depth >= confirmations {
                                let address = receipt.contract_address.ok_or_else(|| {
                                    DeploymentError::Rpc(anyhow::anyhow!(
                                        "Receipt of {} has no contract address",
                                        pending.tx_hash
                                    ))
                                })?;
                                return Ok(ConfirmedDeployment { address, receipt });
                            }
                            tracing::debug!(
                                tx_hash = %pending.tx_hash,
                                depth,
                                required = confirmations,
                                "Waiting for confirmations..."
                            );
                        }
                        Err(e) => {
                            tracing::trace!(error = %e, "Block number query failed, retrying...");
                        }
                    }
                }
                Ok(None) => {
                    tracing::trace!(tx_hash = %pending.tx_hash, "Transaction not mined yet");
                }
                Err(e) => {
                    tracing::trace!(error = %e, "Receipt query failed, retrying...");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl NetworkClient for JsonRpcClient {
    async fn deployer_account(&self) -> Result<Address, DeploymentError> {
        if let Some(account) = self.account {
            return Ok(account);
        }

        let accounts: Vec<Address> = self
            .call("eth_accounts", vec![])
            .await
            .map_err(DeploymentError::Rpc)?;

        accounts.first().copied().ok_or_else(|| {
            DeploymentError::Rpc(anyhow::anyhow!(
                "Node exposes no accounts and no deployer is configured"
            ))
        })
    }

    async fn submit_deployment(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
        from: Address,
    ) -> Result<PendingDeployment, DeploymentError> {
        let mut input = bytecode.to_vec();
        input.extend_from_slice(constructor_args);
        let data = format!("0x{}", hex::encode(&input));

        let tx = serde_json::json!({ "from": from, "data": data });

        let gas: U256 = match self.call("eth_estimateGas", vec![tx.clone()]).await {
            Ok(gas) => gas,
            Err(e) => return Err(self.classify_error(e, from).await),
        };
        let gas_price: U256 = self
            .call("eth_gasPrice", vec![])
            .await
            .map_err(DeploymentError::Rpc)?;

        let required = gas.saturating_mul(gas_price);
        let available = self.balance(from).await?;
        if available < required {
            return Err(DeploymentError::InsufficientFunds {
                account: from,
                available,
                required,
            });
        }

        let tx = serde_json::json!({
            "from": from,
            "data": data,
            "gas": format!("0x{:x}", gas),
        });

        let tx_hash: B256 = match self.call("eth_sendTransaction", vec![tx]).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Err(self.classify_error(e, from).await),
        };

        tracing::info!(tx_hash = %tx_hash, from = %from, gas = %gas, "Deployment transaction sent");

        Ok(PendingDeployment { tx_hash, from })
    }

    async fn wait_confirmations(
        &self,
        pending: &PendingDeployment,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<ConfirmedDeployment, DeploymentError> {
        tokio::time::timeout(timeout, self.poll_receipt(pending, confirmations))
            .await
            .map_err(|_| DeploymentError::Timeout {
                tx_hash: pending.tx_hash,
                confirmations,
                timeout,
            })?
    }

    async fn code_exists(&self, address: Address) -> Result<bool, DeploymentError> {
        let code: Bytes = self
            .call(
                "eth_getCode",
                vec![serde_json::json!(address), serde_json::json!("latest")],
            )
            .await
            .map_err(DeploymentError::Rpc)?;
        Ok(!code.is_empty())
    }
}
