//! Deployment units: one contract to deploy with its constructor arguments.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A constructor argument in its symbolic (human-readable) form.
///
/// The value is coerced against the constructor ABI at deployment time, so `"42"`, `42` and
/// `"0x2a"` are all valid for a `uint256` parameter. Arrays are rendered as `[a, b]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[serde(from = "Value", into = "String")]
pub struct ConstructorArg(String);

impl ConstructorArg {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Value> for ConstructorArg {
    fn from(value: Value) -> Self {
        Self(render_value(&value, false))
    }
}

impl From<ConstructorArg> for String {
    fn from(arg: ConstructorArg) -> Self {
        arg.0
    }
}

impl From<&str> for ConstructorArg {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Render a config value into the textual form understood by the ABI coercer.
///
/// Strings nested in arrays are quoted so that commas inside them survive parsing.
fn render_value(value: &Value, nested: bool) -> String {
    match value {
        Value::String(s) if nested => format!("{s:?}"),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(|v| render_value(v, true)).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One contract deployment task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUnit {
    /// Name of the contract artifact to deploy.
    #[serde(rename = "contract")]
    pub contract_name: String,
    /// Constructor arguments, in declaration order.
    #[serde(default)]
    pub args: Vec<ConstructorArg>,
    /// Labels used to select a subset of units for a run.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl DeploymentUnit {
    pub fn new(contract_name: impl Into<String>) -> Self {
        Self {
            contract_name: contract_name.into(),
            args: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<ConstructorArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Whether this unit is selected by the given tags. An empty selection matches every unit.
    pub fn matches_tags(&self, selected: &BTreeSet<String>) -> bool {
        selected.is_empty() || !self.tags.is_disjoint(selected)
    }

    /// Load a single unit from a deploy script file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deploy script {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse deploy script {}", path.display()))
    }
}

/// Load every `*.toml` deploy script of a directory, ordered by file name.
///
/// Returns an empty list when the directory does not exist.
pub fn load_units_from_dir(dir: &Path) -> Result<Vec<DeploymentUnit>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "No deploy script directory");
        return Ok(Vec::new());
    }

    let mut scripts: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read deploy script directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    scripts.sort();

    scripts
        .iter()
        .map(|path| DeploymentUnit::load_from_file(path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_unit_from_toml() {
        let unit: DeploymentUnit = toml::from_str(
            r#"
            contract = "ERC777Bonding"
            args = ["ERC777BondingCoin", "ECC", []]
            tags = ["all", "erc777bondingCoin"]
            "#,
        )
        .expect("Failed to parse unit");

        assert_eq!(unit.contract_name, "ERC777Bonding");
        assert_eq!(
            unit.args,
            vec![
                ConstructorArg::new("ERC777BondingCoin"),
                ConstructorArg::new("ECC"),
                ConstructorArg::new("[]"),
            ]
        );
        assert!(unit.tags.contains("all"));
    }

    #[test]
    fn test_non_string_args_are_rendered() {
        let unit: DeploymentUnit = toml::from_str(
            r#"
            contract = "Vault"
            args = [1000, true, ["a,b", "c"]]
            "#,
        )
        .expect("Failed to parse unit");

        assert_eq!(unit.args[0].as_str(), "1000");
        assert_eq!(unit.args[1].as_str(), "true");
        assert_eq!(unit.args[2].as_str(), r#"["a,b", "c"]"#);
        assert!(unit.tags.is_empty());
    }

    #[test]
    fn test_tag_selection() {
        let unit = DeploymentUnit::new("Token").tag("all").tag("token");

        assert!(unit.matches_tags(&BTreeSet::new()));
        assert!(unit.matches_tags(&BTreeSet::from(["token".to_string()])));
        assert!(!unit.matches_tags(&BTreeSet::from(["governance".to_string()])));
    }

    #[test]
    fn test_load_units_in_file_name_order() {
        let temp_dir = TempDir::new("shipwright-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("02_token.toml"), "contract = \"Token\"")
            .expect("Failed to write script");
        std::fs::write(temp_dir.path().join("01_registry.toml"), "contract = \"Registry\"")
            .expect("Failed to write script");
        std::fs::write(temp_dir.path().join("README.md"), "not a script")
            .expect("Failed to write readme");

        let units = load_units_from_dir(temp_dir.path()).expect("Failed to load units");
        let names: Vec<_> = units.iter().map(|u| u.contract_name.as_str()).collect();

        assert_eq!(names, vec!["Registry", "Token"]);
    }

    #[test]
    fn test_load_units_missing_dir() {
        let temp_dir = TempDir::new("shipwright-test").expect("Failed to create temp dir");
        let units = load_units_from_dir(&temp_dir.path().join("deploy")).expect("Should not fail");
        assert!(units.is_empty());
    }
}
