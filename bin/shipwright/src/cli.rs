use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use shipwright_deploy::CONFIG_FILENAME;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(
    author,
    version,
    about = "Deploy and verify smart contracts, one declarative unit per contract"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SHIPWRIGHT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    #[arg(long, alias = "conf", env = "SHIPWRIGHT_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy every selected unit to a network, verifying sources where possible.
    Deploy(DeployArgs),
    /// Print the deployments recorded for a network.
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// The target network, as named in the configuration.
    #[arg(short, long, env = "SHIPWRIGHT_NETWORK")]
    pub network: String,

    /// Only deploy units carrying one of these tags (comma separated).
    ///
    /// If not provided, all units are deployed.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Redeploy contracts even if an identical deployment is recorded.
    #[arg(long, env = "SHIPWRIGHT_FORCE", default_value_t = false)]
    pub force: bool,

    /// Stop at the first unit that fails to deploy instead of moving on to the next one.
    #[arg(long, default_value_t = false)]
    pub halt_on_error: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// The network whose deployments are listed.
    #[arg(short, long, env = "SHIPWRIGHT_NETWORK")]
    pub network: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "deploy",
            "--network",
            "sepolia",
            "--tags",
            "all,erc777Coin",
            "--force",
        ])
        .expect("Failed to parse arguments");

        assert_eq!(cli.config, PathBuf::from(CONFIG_FILENAME));
        let Command::Deploy(args) = cli.command else {
            panic!("Expected deploy command");
        };
        assert_eq!(args.network, "sepolia");
        assert_eq!(args.tags, vec!["all", "erc777Coin"]);
        assert!(args.force);
        assert!(!args.halt_on_error);
    }

    #[test]
    fn test_parse_list() {
        let cli = Cli::try_parse_from([
            "shipwright",
            "-v",
            "debug",
            "--config",
            "project/Shipwright.toml",
            "list",
            "-n",
            "localhost",
        ])
        .expect("Failed to parse arguments");

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        assert!(matches!(
            cli.command,
            Command::List(ListArgs { network }) if network == "localhost"
        ));
    }

    #[test]
    fn test_network_is_required() {
        assert!(Cli::try_parse_from(["shipwright", "deploy"]).is_err());
    }
}
