//! shipwright is a CLI tool to deploy smart contracts and verify their sources, idempotently.

mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, ListArgs};
use shipwright_deploy::{
    ArtifactRegistry, ConfigError, Deployer, DeploymentRecord, EtherscanClient, JsonRpcClient,
    NetworkClassifier, Orchestrator, OrchestratorOptions, ProjectConfig, RetryPolicy, Verifier,
    cancellation,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = ProjectConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    tracing::debug!(
        config_path = %cli.config.display(),
        artifacts = %config.paths.artifacts.display(),
        deployments = %config.paths.deployments.display(),
        networks = config.networks.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Deploy(args) => deploy(config, args).await,
        Command::List(args) => list(config, args),
    }
}

async fn deploy(config: ProjectConfig, args: DeployArgs) -> Result<ExitCode> {
    let credentials = config.resolve_credentials();
    let classifier = NetworkClassifier::new(&config, &credentials);

    let network = config
        .network(&args.network)
        .ok_or_else(|| ConfigError::UnknownNetwork(args.network.clone()))?;

    let client = JsonRpcClient::new(network.rpc_url.clone())?
        .with_account(config.deployer)
        .with_poll_interval(config.receipt_poll_interval());

    let explorer = match (
        &network.explorer,
        credentials.api_key(&config, &args.network),
    ) {
        (Some(explorer), Some(api_key)) => Some(
            EtherscanClient::new(explorer.api_url.clone(), api_key)?.with_status_polling(
                config.verification.status_polls,
                config.verification.status_poll_interval(),
            ),
        ),
        _ => None,
    };

    let registry = ArtifactRegistry::new(
        config.paths.artifacts.clone(),
        config.paths.deployments.clone(),
    );

    let orchestrator = Orchestrator::new(
        classifier,
        Deployer::new(client, registry, config.confirmation_timeout()),
        Verifier::new(explorer, RetryPolicy::from(&config.verification)),
        OrchestratorOptions {
            force: args.force,
            continue_on_error: !args.halt_on_error,
            tags: args.tags.into_iter().collect(),
        },
    );

    let units = config.deployment_units()?;

    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling the deployment run...");
            handle.cancel();
        }
    });

    let summary = orchestrator.run(&units, &args.network, &cancel).await?;

    println!("{}", summary.render_table());

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(
            aborted = summary.aborted().count(),
            cancelled = summary.cancelled,
            "Deployment run did not complete successfully"
        );
        Ok(ExitCode::FAILURE)
    }
}

fn list(config: ProjectConfig, args: ListArgs) -> Result<ExitCode> {
    let registry = ArtifactRegistry::new(
        config.paths.artifacts.clone(),
        config.paths.deployments.clone(),
    );
    let records = registry.list(&args.network)?;

    if records.is_empty() {
        tracing::info!(network = %args.network, "No deployments recorded");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", records_table(&records));
    Ok(ExitCode::SUCCESS)
}

fn records_table(records: &[DeploymentRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Contract",
        "Address",
        "Block",
        "Transaction",
        "Verified",
        "Deployed at",
    ]);

    for record in records {
        let deployed_at = chrono::DateTime::from_timestamp(record.deployed_at, 0)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            record.contract_name.clone(),
            record.address.to_string(),
            record.block_number.to_string(),
            record.tx_hash.to_string(),
            if record.verified { "yes" } else { "no" }.to_string(),
            deployed_at,
        ]);
    }

    table
}
