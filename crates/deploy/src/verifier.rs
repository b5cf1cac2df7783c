//! Source verification with bounded retries.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, Bytes};
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::{
    Cancellation, DeploymentRecord, SourceMetadata, VerificationError,
    client::{ExplorerClient, ExplorerStatus, VerificationRequest},
    config::VerificationConfig,
    deployment_hash::constructor_args_hash,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum VerificationStatus {
    Pending,
    Succeeded,
    AlreadyVerified,
    Failed,
}

impl VerificationStatus {
    /// Whether the contract source is published on the explorer.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Succeeded | Self::AlreadyVerified)
    }
}

/// Outcome of verifying one deployed contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub address: Address,
    pub constructor_args: Bytes,
    pub status: VerificationStatus,
    /// Number of submissions made to the explorer.
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl VerificationAttempt {
    fn new(address: Address, constructor_args: Bytes) -> Self {
        Self {
            address,
            constructor_args,
            status: VerificationStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }

    fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = VerificationStatus::Failed;
        self.last_error = Some(error.into());
        self
    }
}

/// Backoff bounds applied to transient explorer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Submissions including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Time budget for all submissions and delays of one contract.
    pub max_total_wait: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl From<&VerificationConfig> for RetryPolicy {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_wait: Duration::from_secs(config.max_total_wait_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

/// Submits deployed contracts for source verification.
#[derive(Debug, Clone)]
pub struct Verifier<E> {
    explorer: E,
    policy: RetryPolicy,
}

impl<E: ExplorerClient> Verifier<E> {
    pub fn new(explorer: E, policy: RetryPolicy) -> Self {
        Self { explorer, policy }
    }

    pub fn explorer(&self) -> &E {
        &self.explorer
    }

    /// Verify a deployed contract.
    ///
    /// `constructor_args` must be the exact encoding that was deployed; anything else is a
    /// [`VerificationError::ConstructorArgsMismatch`]. Explorer failures never produce an
    /// error: they end in a [`VerificationStatus::Failed`] attempt.
    pub async fn verify(
        &self,
        record: &DeploymentRecord,
        constructor_args: &Bytes,
        source: Option<&SourceMetadata>,
        chain_id: Option<u64>,
        cancel: &Cancellation,
    ) -> Result<VerificationAttempt, VerificationError> {
        let actual = constructor_args_hash(constructor_args);
        if actual != record.constructor_args_hash {
            return Err(VerificationError::ConstructorArgsMismatch {
                expected: record.constructor_args_hash.clone(),
                actual,
            });
        }

        let attempt = VerificationAttempt::new(record.address, constructor_args.clone());

        let Some(source) = source else {
            tracing::warn!(
                contract = %record.contract_name,
                address = %record.address,
                "No compiler input found for contract, cannot verify"
            );
            return Ok(attempt.failed("missing source metadata (build-info)"));
        };

        if cancel.is_cancelled() {
            return Err(VerificationError::Cancelled);
        }

        let request = VerificationRequest {
            address: record.address,
            chain_id,
            source: source.clone(),
            constructor_args: constructor_args.clone(),
        };

        tracing::info!(
            contract = %record.contract_name,
            address = %record.address,
            max_attempts = self.policy.max_attempts,
            "Verifying contract..."
        );

        let attempts = AtomicU32::new(0);
        let transient_error = Mutex::new(None::<String>);
        let request = &request;
        let counter = &attempts;
        let last_transient = &transient_error;

        // Transient outcomes are mapped to `Err` so that backon retries them.
        let submit = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let outcome = match self.explorer.submit_verification(request).await {
                Ok(response) if response.status.is_transient() => {
                    Err(format!("{}: {}", response.status, response.message))
                }
                Ok(response) => Ok(response),
                Err(e) => Err(format!("transport error: {e:#}")),
            };
            if let (Err(message), Ok(mut slot)) = (&outcome, last_transient.lock()) {
                *slot = Some(message.clone());
            }
            outcome
        };

        let retry = submit
            .retry(self.policy.backoff())
            .sleep(tokio::time::sleep)
            .notify(|err: &String, delay: Duration| {
                tracing::warn!(
                    contract = %record.contract_name,
                    error = %err,
                    retry_in = ?delay,
                    "Verification attempt failed, retrying..."
                );
            });

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(self.policy.max_total_wait, retry) => outcome,
            _ = cancel.cancelled() => return Err(VerificationError::Cancelled),
        };

        let mut attempt = VerificationAttempt {
            attempt_count: attempts.load(Ordering::SeqCst),
            ..attempt
        };

        let attempt = match outcome {
            Ok(Ok(response)) => match response.status {
                ExplorerStatus::Verified => {
                    attempt.status = VerificationStatus::Succeeded;
                    attempt
                }
                ExplorerStatus::AlreadyVerified => {
                    attempt.status = VerificationStatus::AlreadyVerified;
                    attempt
                }
                _ => attempt.failed(format!("{}: {}", response.status, response.message)),
            },
            Ok(Err(last_error)) => attempt.failed(last_error),
            Err(_) => {
                let budget = self.policy.max_total_wait;
                let message = match transient_error.lock().ok().and_then(|mut slot| slot.take()) {
                    Some(last) => format!("{last} (time budget of {budget:?} exhausted)"),
                    None => format!("verification did not complete within {budget:?}"),
                };
                attempt.failed(message)
            }
        };

        match attempt.status {
            VerificationStatus::Failed => tracing::warn!(
                contract = %record.contract_name,
                address = %record.address,
                attempts = attempt.attempt_count,
                error = attempt.last_error.as_deref().unwrap_or_default(),
                "Verification failed"
            ),
            status => tracing::info!(
                contract = %record.contract_name,
                address = %record.address,
                attempts = attempt.attempt_count,
                status = %status,
                "Verification finished"
            ),
        }

        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancellation,
        deployment_hash::constructor_args_hash,
        registry::tests::sample_record,
        testing::{MockExplorer, fast_policy, source_metadata},
    };

    fn record_for(args: &Bytes) -> DeploymentRecord {
        DeploymentRecord {
            constructor_args_hash: constructor_args_hash(args),
            constructor_args: args.clone(),
            ..sample_record("Token", "testnet")
        }
    }

    async fn run(
        explorer: MockExplorer,
        policy: RetryPolicy,
    ) -> (Verifier<MockExplorer>, VerificationAttempt) {
        let args = Bytes::from(vec![0xaa; 64]);
        let record = record_for(&args);
        let verifier = Verifier::new(explorer, policy);
        let attempt = verifier
            .verify(
                &record,
                &args,
                Some(&source_metadata()),
                Some(11155111),
                &Cancellation::never(),
            )
            .await
            .expect("Verification must not error");
        (verifier, attempt)
    }

    #[tokio::test]
    async fn test_verified_on_first_attempt() {
        let (verifier, attempt) = run(
            MockExplorer::always(ExplorerStatus::Verified),
            fast_policy(5),
        )
        .await;

        assert_eq!(attempt.status, VerificationStatus::Succeeded);
        assert_eq!(attempt.attempt_count, 1);
        assert_eq!(attempt.last_error, None);
        assert_eq!(verifier.explorer().calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_twice_then_verified() {
        let explorer = MockExplorer::scripted([
            ExplorerStatus::RateLimited,
            ExplorerStatus::RateLimited,
            ExplorerStatus::Verified,
        ]);
        let (_, attempt) = run(explorer, fast_policy(5)).await;

        assert_eq!(attempt.status, VerificationStatus::Succeeded);
        assert_eq!(attempt.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_bounded() {
        let (verifier, attempt) = run(
            MockExplorer::always(ExplorerStatus::Pending),
            fast_policy(4),
        )
        .await;

        assert_eq!(attempt.status, VerificationStatus::Failed);
        assert_eq!(attempt.attempt_count, 4);
        assert_eq!(verifier.explorer().calls(), 4);
        assert!(
            attempt
                .last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("pending"))
        );
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let explorer = MockExplorer::scripted([ExplorerStatus::Verified]).with_transport_errors(2);
        let (_, attempt) = run(explorer, fast_policy(5)).await;

        assert_eq!(attempt.status, VerificationStatus::Succeeded);
        assert_eq!(attempt.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (_, attempt) = run(
            MockExplorer::always(ExplorerStatus::Rejected),
            fast_policy(5),
        )
        .await;

        assert_eq!(attempt.status, VerificationStatus::Failed);
        assert_eq!(attempt.attempt_count, 1);
        assert!(attempt.last_error.is_some());
    }

    #[tokio::test]
    async fn test_already_verified_is_terminal() {
        let (_, attempt) = run(
            MockExplorer::always(ExplorerStatus::AlreadyVerified),
            fast_policy(5),
        )
        .await;

        assert_eq!(attempt.status, VerificationStatus::AlreadyVerified);
        assert!(attempt.status.is_verified());
        assert_eq!(attempt.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_total_wait_budget() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            max_total_wait: Duration::from_millis(50),
        };
        let (_, attempt) = run(MockExplorer::always(ExplorerStatus::Unavailable), policy).await;

        assert_eq!(attempt.status, VerificationStatus::Failed);
        assert!(attempt.attempt_count < 100);
        let last_error = attempt.last_error.expect("Failed attempt must carry an error");
        assert!(last_error.starts_with("unavailable"), "{last_error}");
        assert!(last_error.contains("exhausted"), "{last_error}");
    }

    #[tokio::test]
    async fn test_constructor_args_mismatch() {
        let deployed = Bytes::from(vec![0xaa; 32]);
        let record = record_for(&deployed);
        let verifier = Verifier::new(
            MockExplorer::always(ExplorerStatus::Verified),
            fast_policy(5),
        );

        let result = verifier
            .verify(
                &record,
                &Bytes::from(vec![0xbb; 32]),
                Some(&source_metadata()),
                None,
                &Cancellation::never(),
            )
            .await;

        assert!(matches!(
            result,
            Err(VerificationError::ConstructorArgsMismatch { .. })
        ));
        assert_eq!(verifier.explorer().calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_submission() {
        let args = Bytes::new();
        let record = record_for(&args);
        let verifier = Verifier::new(
            MockExplorer::always(ExplorerStatus::Verified),
            fast_policy(5),
        );

        let attempt = verifier
            .verify(&record, &args, None, None, &Cancellation::never())
            .await
            .expect("Verification must not error");

        assert_eq!(attempt.status, VerificationStatus::Failed);
        assert_eq!(attempt.attempt_count, 0);
        assert_eq!(verifier.explorer().calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let args = Bytes::new();
        let record = record_for(&args);
        let verifier = Verifier::new(
            MockExplorer::always(ExplorerStatus::Verified),
            fast_policy(5),
        );
        let (handle, cancel) = cancellation();
        handle.cancel();

        let result = verifier
            .verify(&record, &args, Some(&source_metadata()), None, &cancel)
            .await;

        assert!(matches!(result, Err(VerificationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let args = Bytes::new();
        let record = record_for(&args);
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            max_total_wait: Duration::from_secs(60),
        };
        let verifier = Verifier::new(MockExplorer::always(ExplorerStatus::RateLimited), policy);
        let (handle, cancel) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            verifier.verify(&record, &args, Some(&source_metadata()), None, &cancel),
        )
        .await
        .expect("Cancellation must interrupt the backoff delay");

        assert!(matches!(result, Err(VerificationError::Cancelled)));
        assert_eq!(verifier.explorer().calls(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&VerificationConfig {
            max_attempts: 0,
            ..VerificationConfig::default()
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().initial_delay, Duration::from_secs(2));
    }
}
