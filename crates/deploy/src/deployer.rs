use std::time::Duration;

use alloy_core::{
    dyn_abi::{DynSolValue, Specifier},
    primitives::Bytes,
};

use crate::{
    Artifact, ArtifactRegistry, Cancellation, ConstructorArg, DeploymentError, DeploymentRecord,
    DeploymentUnit, NetworkProfile, SourceMetadata,
    client::NetworkClient,
    deployment_hash::{bytecode_hash, constructor_args_hash},
};

/// Result of [`Deployer::deploy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub record: DeploymentRecord,
    /// True when an existing record was returned and no transaction was sent.
    pub reused: bool,
    /// Compiler input of the deployed artifact, if the build info is available.
    pub source: Option<SourceMetadata>,
}

/// ABI-encode symbolic constructor arguments against an artifact's constructor.
///
/// The returned bytes are exactly what gets appended to the creation bytecode, and what the
/// verifier later submits to the explorer.
pub fn encode_constructor_args(
    artifact: &Artifact,
    args: &[ConstructorArg],
) -> Result<Bytes, DeploymentError> {
    let invalid = |reason: String| DeploymentError::ConstructorArgs {
        contract: artifact.contract_name.clone(),
        reason,
    };

    let inputs = artifact
        .abi
        .constructor
        .as_ref()
        .map(|constructor| constructor.inputs.as_slice())
        .unwrap_or_default();

    if inputs.len() != args.len() {
        return Err(invalid(format!(
            "expected {} argument(s), got {}",
            inputs.len(),
            args.len()
        )));
    }

    let values = inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| {
            let ty = param.resolve().map_err(|e| {
                invalid(format!(
                    "argument #{i} has unsupported type {}: {e}",
                    param.ty
                ))
            })?;
            ty.coerce_str(arg.as_str()).map_err(|e| {
                invalid(format!(
                    "argument #{i} '{}' is not a valid {}: {e}",
                    param.name, param.ty
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DynSolValue::Tuple(values).abi_encode_params().into())
}

/// Deploys contracts and records them in the [`ArtifactRegistry`].
#[derive(Debug, Clone)]
pub struct Deployer<C> {
    client: C,
    registry: ArtifactRegistry,
    confirmation_timeout: Duration,
}

impl<C: NetworkClient> Deployer<C> {
    pub fn new(client: C, registry: ArtifactRegistry, confirmation_timeout: Duration) -> Self {
        Self {
            client,
            registry,
            confirmation_timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Resolve the unit's artifact and encode its constructor arguments.
    pub fn prepare(&self, unit: &DeploymentUnit) -> Result<(Artifact, Bytes), DeploymentError> {
        let artifact = self
            .registry
            .artifact(&unit.contract_name)
            .map_err(|source| DeploymentError::Artifact {
                contract: unit.contract_name.clone(),
                source,
            })?;
        let constructor_args = encode_constructor_args(&artifact, &unit.args)?;
        Ok((artifact, constructor_args))
    }

    /// Deploy a unit on the profiled network.
    ///
    /// Unless `force` is set, an existing record with the same constructor arguments and
    /// bytecode is returned without sending a transaction. A new record is only written once
    /// the transaction reached `profile.required_confirmations`.
    pub async fn deploy(
        &self,
        unit: &DeploymentUnit,
        profile: &NetworkProfile,
        force: bool,
        cancel: &Cancellation,
    ) -> Result<DeployOutcome, DeploymentError> {
        let (artifact, constructor_args) = self.prepare(unit)?;
        let args_hash = constructor_args_hash(&constructor_args);
        let code_hash = bytecode_hash(&artifact.bytecode);

        if !force {
            let existing = self
                .registry
                .get(&unit.contract_name, &profile.name)
                .map_err(DeploymentError::Registry)?;

            match existing {
                Some(record)
                    if record.constructor_args_hash == args_hash
                        && record.bytecode_hash == code_hash =>
                {
                    // Development nodes lose their state on restart.
                    if profile.is_ephemeral && !self.client.code_exists(record.address).await? {
                        tracing::info!(
                            contract = %unit.contract_name,
                            network = %profile.name,
                            previous_address = %record.address,
                            "No code at recorded address, redeploying"
                        );
                    } else {
                        tracing::info!(
                            contract = %unit.contract_name,
                            network = %profile.name,
                            address = %record.address,
                            "Reusing existing deployment"
                        );
                        return Ok(DeployOutcome {
                            record,
                            reused: true,
                            source: artifact.source,
                        });
                    }
                }
                Some(record) => {
                    tracing::info!(
                        contract = %unit.contract_name,
                        network = %profile.name,
                        previous_address = %record.address,
                        "Constructor arguments or bytecode changed, redeploying"
                    );
                }
                None => {}
            }
        }

        if cancel.is_cancelled() {
            return Err(DeploymentError::Cancelled);
        }

        let from = self.client.deployer_account().await?;

        tracing::info!(
            contract = %unit.contract_name,
            network = %profile.name,
            from = %from,
            force,
            "Deploying contract..."
        );

        let pending = tokio::select! {
            pending = self
                .client
                .submit_deployment(&artifact.bytecode, &constructor_args, from) => pending?,
            _ = cancel.cancelled() => return Err(DeploymentError::Cancelled),
        };

        let confirmed = tokio::select! {
            confirmed = self.client.wait_confirmations(
                &pending,
                profile.required_confirmations,
                self.confirmation_timeout,
            ) => confirmed?,
            _ = cancel.cancelled() => {
                tracing::warn!(
                    contract = %unit.contract_name,
                    tx_hash = %pending.tx_hash,
                    "Cancelled while waiting for confirmations, the transaction may still be mined"
                );
                return Err(DeploymentError::Cancelled);
            }
        };

        let record = DeploymentRecord {
            contract_name: unit.contract_name.clone(),
            network_name: profile.name.clone(),
            constructor_args_hash: args_hash,
            constructor_args,
            bytecode_hash: code_hash,
            address: confirmed.address,
            tx_hash: confirmed.receipt.tx_hash,
            block_number: confirmed.receipt.block_number,
            deployer: from,
            deployed_at: chrono::Utc::now().timestamp(),
            verified: false,
        };

        self.registry
            .put(&record)
            .map_err(DeploymentError::Registry)?;

        tracing::info!(
            contract = %unit.contract_name,
            network = %profile.name,
            address = %record.address,
            tx_hash = %record.tx_hash,
            block_number = record.block_number,
            gas_used = confirmed.receipt.gas_used,
            confirmations = profile.required_confirmations,
            "Contract deployed"
        );

        Ok(DeployOutcome {
            record,
            reused: false,
            source: artifact.source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempdir::TempDir;

    use super::*;
    use crate::{
        cancellation,
        registry::tests::write_token_artifact,
        testing::{MockNetworkClient, profile},
    };

    fn setup(client: MockNetworkClient) -> (TempDir, Deployer<MockNetworkClient>) {
        let temp_dir = TempDir::new("shipwright-test").expect("Failed to create temp dir");
        let artifacts = temp_dir.path().join("artifacts");
        write_token_artifact(&artifacts);
        let registry = ArtifactRegistry::new(artifacts, temp_dir.path().join("deployments"));
        let deployer = Deployer::new(client, registry, Duration::from_secs(5));
        (temp_dir, deployer)
    }

    fn token() -> DeploymentUnit {
        DeploymentUnit::new("Token").arg("Token").arg("TKN")
    }

    #[test]
    fn test_encode_constructor_args() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let (artifact, encoded) = deployer.prepare(&token()).expect("Failed to prepare");

        // Two dynamic strings: two offsets, then length + padded data for each.
        assert_eq!(encoded.len(), 6 * 32);

        let swapped = encode_constructor_args(
            &artifact,
            &[ConstructorArg::new("TKN"), ConstructorArg::new("Token")],
        )
        .expect("Failed to encode");
        assert_ne!(encoded, swapped, "Argument order must be significant");
    }

    #[test]
    fn test_encode_wrong_arity() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let unit = DeploymentUnit::new("Token").arg("Token");

        assert!(matches!(
            deployer.prepare(&unit),
            Err(DeploymentError::ConstructorArgs { contract, .. }) if contract == "Token"
        ));
    }

    #[test]
    fn test_prepare_unknown_artifact() {
        let (_dir, deployer) = setup(MockNetworkClient::default());

        assert!(matches!(
            deployer.prepare(&DeploymentUnit::new("Missing")),
            Err(DeploymentError::Artifact { .. })
        ));
    }

    #[tokio::test]
    async fn test_deploy_is_idempotent() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("sepolia", false, true);
        let cancel = crate::Cancellation::never();

        let first = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("First deployment failed");
        let second = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("Second deployment failed");

        assert!(!first.reused);
        assert_eq!(
            second,
            DeployOutcome {
                reused: true,
                ..first.clone()
            }
        );
        assert_eq!(deployer.client().submissions(), 1);
        assert!(!second.record.verified);
        // Persistent networks trust the record without querying the chain.
        assert_eq!(deployer.client().code_checks(), 0);
    }

    #[tokio::test]
    async fn test_ephemeral_reuse_checks_code() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("hardhat", true, false);
        let cancel = crate::Cancellation::never();

        let first = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("First deployment failed");
        let reused = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("Second deployment failed");

        assert!(reused.reused);
        assert_eq!(reused.record, first.record);
        assert_eq!(deployer.client().code_checks(), 1);
        assert_eq!(deployer.client().submissions(), 1);
    }

    #[tokio::test]
    async fn test_ephemeral_chain_reset_redeploys() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("hardhat", true, false);
        let cancel = crate::Cancellation::never();

        let first = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("First deployment failed");

        deployer.client().reset_chain();

        let redeployed = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("Redeployment failed");

        assert!(!redeployed.reused);
        assert_ne!(redeployed.record.address, first.record.address);
        assert_eq!(deployer.client().submissions(), 2);
        assert_eq!(
            deployer
                .registry()
                .get("Token", "hardhat")
                .expect("Failed to read record"),
            Some(redeployed.record)
        );
    }

    #[tokio::test]
    async fn test_force_redeploys_and_overwrites() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("sepolia", false, true);
        let cancel = crate::Cancellation::never();

        let first = deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("First deployment failed");
        let forced = deployer
            .deploy(&token(), &profile, true, &cancel)
            .await
            .expect("Forced deployment failed");

        assert!(!forced.reused);
        assert_ne!(first.record.address, forced.record.address);
        assert_eq!(deployer.client().submissions(), 2);
        assert_eq!(
            deployer
                .registry()
                .get("Token", "sepolia")
                .expect("Failed to read record"),
            Some(forced.record)
        );
    }

    #[tokio::test]
    async fn test_changed_args_redeploy() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("sepolia", false, true);
        let cancel = crate::Cancellation::never();

        deployer
            .deploy(&token(), &profile, false, &cancel)
            .await
            .expect("First deployment failed");
        let changed = deployer
            .deploy(
                &DeploymentUnit::new("Token").arg("Token").arg("TK2"),
                &profile,
                false,
                &cancel,
            )
            .await
            .expect("Second deployment failed");

        assert!(!changed.reused);
        assert_eq!(deployer.client().submissions(), 2);
    }

    #[tokio::test]
    async fn test_waits_for_required_confirmations() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let mut profile = profile("sepolia", false, true);
        profile.required_confirmations = 6;

        deployer
            .deploy(&token(), &profile, false, &crate::Cancellation::never())
            .await
            .expect("Deployment failed");

        assert_eq!(deployer.client().requested_confirmations(), vec![6]);
    }

    #[tokio::test]
    async fn test_revert_writes_no_record() {
        let (_dir, deployer) = setup(MockNetworkClient::default().reverting());
        let profile = profile("sepolia", false, true);

        let result = deployer
            .deploy(&token(), &profile, false, &crate::Cancellation::never())
            .await;

        assert!(matches!(result, Err(DeploymentError::Reverted { .. })));
        assert_eq!(
            deployer
                .registry()
                .get("Token", "sepolia")
                .expect("Failed to read record"),
            None
        );
    }

    #[tokio::test]
    async fn test_timeout_writes_no_record() {
        let (_dir, deployer) = setup(MockNetworkClient::default().timing_out());
        let profile = profile("sepolia", false, true);

        let result = deployer
            .deploy(&token(), &profile, false, &crate::Cancellation::never())
            .await;

        assert!(matches!(result, Err(DeploymentError::Timeout { .. })));
        assert!(
            deployer
                .registry()
                .list("sepolia")
                .expect("Failed to list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_submission() {
        let (_dir, deployer) = setup(MockNetworkClient::default());
        let profile = profile("sepolia", false, true);
        let (handle, cancel) = cancellation();
        handle.cancel();

        let result = deployer.deploy(&token(), &profile, false, &cancel).await;

        assert!(matches!(result, Err(DeploymentError::Cancelled)));
        assert_eq!(deployer.client().submissions(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_for_confirmations() {
        let (_dir, deployer) = setup(MockNetworkClient::default().stalling());
        let profile = profile("sepolia", false, true);
        let (handle, cancel) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            deployer.deploy(&token(), &profile, false, &cancel),
        )
        .await
        .expect("Cancellation must interrupt the confirmation wait");

        assert!(matches!(result, Err(DeploymentError::Cancelled)));
        assert_eq!(deployer.client().submissions(), 1);
        assert_eq!(
            deployer
                .registry()
                .get("Token", "sepolia")
                .expect("Failed to read record"),
            None
        );
    }
}
