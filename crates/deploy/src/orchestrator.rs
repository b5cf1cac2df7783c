//! Runs deployment units through classification, deployment and verification.

use std::collections::BTreeSet;

use alloy_core::primitives::Address;
use comfy_table::{Table, presets::UTF8_FULL};
use derive_more::Display;

use crate::{
    Cancellation, ConfigError, DeploymentError, DeploymentUnit, NetworkClassifier, NetworkProfile,
    VerificationAttempt, VerificationError, VerificationStatus, Verifier,
    client::{ExplorerClient, NetworkClient},
    deployer::{DeployOutcome, Deployer},
};

/// Lifecycle of a single deployment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UnitState {
    Pending,
    Classifying,
    Deploying,
    Verifying,
    Skipped,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    #[strum(to_string = "ephemeral network")]
    Ephemeral,
    #[strum(to_string = "no explorer credentials")]
    MissingCredentials,
}

/// What happened to a unit's source verification.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum VerificationOutcome {
    #[display("verified")]
    Verified,
    #[display("already verified")]
    AlreadyVerified,
    /// The reused record was verified by an earlier run.
    #[display("verified (previous run)")]
    PreviouslyVerified,
    #[display("skipped ({_0})")]
    Skipped(SkipReason),
    #[display("failed: {_0}")]
    Failed(String),
    /// The unit never got past deployment.
    #[display("-")]
    NotReached,
}

/// Terminal report of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub contract_name: String,
    /// `Done`, `Aborted`, or `Pending` when the run stopped before the unit.
    pub state: UnitState,
    pub address: Option<Address>,
    pub reused: bool,
    pub verification: VerificationOutcome,
    pub attempt: Option<VerificationAttempt>,
    pub error: Option<String>,
}

impl UnitReport {
    fn new(unit: &DeploymentUnit) -> Self {
        Self {
            contract_name: unit.contract_name.clone(),
            state: UnitState::Pending,
            address: None,
            reused: false,
            verification: VerificationOutcome::NotReached,
            attempt: None,
            error: None,
        }
    }
}

/// Result of [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub network: String,
    pub reports: Vec<UnitReport>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Every selected unit reached `Done` and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.reports.iter().all(|r| r.state == UnitState::Done)
    }

    pub fn aborted(&self) -> impl Iterator<Item = &UnitReport> {
        self.reports.iter().filter(|r| r.state == UnitState::Aborted)
    }

    pub fn render_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "Contract",
            "State",
            "Address",
            "Deployment",
            "Verification",
        ]);

        for report in &self.reports {
            let deployment = match (&report.error, report.address) {
                (Some(error), _) => error.clone(),
                (None, Some(_)) if report.reused => "reused".to_string(),
                (None, Some(_)) => "deployed".to_string(),
                (None, None) => "-".to_string(),
            };
            table.add_row(vec![
                report.contract_name.clone(),
                report.state.to_string(),
                report
                    .address
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                deployment,
                report.verification.to_string(),
            ]);
        }

        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Redeploy even when a matching record exists.
    pub force: bool,
    /// Keep running the remaining units after one is aborted.
    pub continue_on_error: bool,
    /// Only run units carrying one of these tags; empty runs everything.
    pub tags: BTreeSet<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            force: false,
            continue_on_error: true,
            tags: BTreeSet::new(),
        }
    }
}

/// Sequential deployment pipeline over one network.
#[derive(Debug)]
pub struct Orchestrator<C, E> {
    classifier: NetworkClassifier,
    deployer: Deployer<C>,
    verifier: Verifier<E>,
    options: OrchestratorOptions,
}

impl<C: NetworkClient, E: ExplorerClient> Orchestrator<C, E> {
    pub fn new(
        classifier: NetworkClassifier,
        deployer: Deployer<C>,
        verifier: Verifier<E>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            classifier,
            deployer,
            verifier,
            options,
        }
    }

    pub fn deployer(&self) -> &Deployer<C> {
        &self.deployer
    }

    pub fn verifier(&self) -> &Verifier<E> {
        &self.verifier
    }

    /// Run the selected units in declared order.
    ///
    /// Only configuration problems fail the run; unit failures are reported in the summary.
    pub async fn run(
        &self,
        units: &[DeploymentUnit],
        network: &str,
        cancel: &Cancellation,
    ) -> Result<RunSummary, ConfigError> {
        let profile = self.classifier.classify(network)?;

        let selected: Vec<_> = units
            .iter()
            .filter(|unit| unit.matches_tags(&self.options.tags))
            .collect();

        tracing::info!(
            network = %profile.name,
            ephemeral = profile.is_ephemeral,
            confirmations = profile.required_confirmations,
            verification = profile.requires_verification(),
            units = selected.len(),
            "Starting deployment run"
        );

        let mut summary = RunSummary {
            network: profile.name.clone(),
            reports: Vec::with_capacity(selected.len()),
            cancelled: false,
        };
        let mut stopped = false;

        for unit in selected {
            if !stopped && cancel.is_cancelled() {
                tracing::warn!("Run cancelled, remaining units will not be deployed");
                summary.cancelled = true;
                stopped = true;
            }
            if stopped {
                summary.reports.push(UnitReport::new(unit));
                continue;
            }

            let (report, cancelled) = self.run_unit(unit, &profile, cancel).await;

            if cancelled {
                summary.cancelled = true;
                stopped = true;
            } else if report.state == UnitState::Aborted && !self.options.continue_on_error {
                tracing::warn!(
                    contract = %unit.contract_name,
                    "Halting run after failed unit"
                );
                stopped = true;
            }

            summary.reports.push(report);
        }

        let aborted = summary.aborted().count();
        tracing::info!(
            network = %summary.network,
            units = summary.reports.len(),
            aborted,
            cancelled = summary.cancelled,
            "Deployment run finished"
        );

        Ok(summary)
    }

    /// Drive one unit to a terminal state. The flag is set when the unit saw cancellation.
    async fn run_unit(
        &self,
        unit: &DeploymentUnit,
        profile: &NetworkProfile,
        cancel: &Cancellation,
    ) -> (UnitReport, bool) {
        let mut report = UnitReport::new(unit);

        // The profile is resolved once per run; classification of a unit cannot fail.
        advance(&mut report, UnitState::Classifying);
        advance(&mut report, UnitState::Deploying);

        let outcome = match self
            .deployer
            .deploy(unit, profile, self.options.force, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let cancelled = matches!(e, DeploymentError::Cancelled);
                let message = format!("{:#}", anyhow::Error::from(e));
                tracing::error!(
                    contract = %unit.contract_name,
                    network = %profile.name,
                    error = %message,
                    "Deployment failed"
                );
                report.error = Some(message);
                advance(&mut report, UnitState::Aborted);
                return (report, cancelled);
            }
        };

        report.address = Some(outcome.record.address);
        report.reused = outcome.reused;

        if !profile.requires_verification() {
            let reason = if profile.is_ephemeral {
                SkipReason::Ephemeral
            } else {
                SkipReason::MissingCredentials
            };
            tracing::info!(
                contract = %unit.contract_name,
                reason = %reason,
                "Skipping verification"
            );
            report.verification = VerificationOutcome::Skipped(reason);
            advance(&mut report, UnitState::Skipped);
            advance(&mut report, UnitState::Done);
            return (report, false);
        }

        if outcome.reused && outcome.record.verified {
            tracing::info!(
                contract = %unit.contract_name,
                address = %outcome.record.address,
                "Contract already verified by a previous run"
            );
            report.verification = VerificationOutcome::PreviouslyVerified;
            advance(&mut report, UnitState::Skipped);
            advance(&mut report, UnitState::Done);
            return (report, false);
        }

        advance(&mut report, UnitState::Verifying);
        let cancelled = self.verify(unit, profile, outcome, cancel, &mut report).await;
        if cancelled {
            // The deployment record written above stays valid.
            report.error = Some(VerificationError::Cancelled.to_string());
            advance(&mut report, UnitState::Aborted);
        } else {
            advance(&mut report, UnitState::Done);
        }

        (report, cancelled)
    }

    async fn verify(
        &self,
        unit: &DeploymentUnit,
        profile: &NetworkProfile,
        outcome: DeployOutcome,
        cancel: &Cancellation,
        report: &mut UnitReport,
    ) -> bool {
        let DeployOutcome {
            mut record, source, ..
        } = outcome;

        let result = self
            .verifier
            .verify(
                &record,
                &record.constructor_args,
                source.as_ref(),
                profile.chain_id,
                cancel,
            )
            .await;

        let attempt = match result {
            Ok(attempt) => attempt,
            Err(e) => {
                let cancelled = matches!(e, VerificationError::Cancelled);
                tracing::error!(
                    contract = %unit.contract_name,
                    error = %e,
                    "Verification error"
                );
                report.verification = VerificationOutcome::Failed(e.to_string());
                return cancelled;
            }
        };

        report.verification = match attempt.status {
            VerificationStatus::Succeeded => VerificationOutcome::Verified,
            VerificationStatus::AlreadyVerified => VerificationOutcome::AlreadyVerified,
            VerificationStatus::Pending | VerificationStatus::Failed => VerificationOutcome::Failed(
                attempt
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
        };

        if attempt.status.is_verified() {
            record.verified = true;
            if let Err(e) = self.deployer.registry().put(&record) {
                let e = VerificationError::Registry(e);
                tracing::error!(
                    contract = %unit.contract_name,
                    error = %e,
                    "Failed to record verification"
                );
                report.error = Some(e.to_string());
            }
        }

        report.attempt = Some(attempt);
        false
    }
}

fn advance(report: &mut UnitReport, next: UnitState) {
    tracing::debug!(
        contract = %report.contract_name,
        from = %report.state,
        to = %next,
        "Unit state transition"
    );
    report.state = next;
}
