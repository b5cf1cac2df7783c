//! Artifact registry: compiled contract artifacts and persisted deployment records.
//!
//! Layout on disk follows hardhat conventions:
//!
//! ```text
//! artifacts/contracts/Token.sol/Token.json       compiled artifact
//! artifacts/contracts/Token.sol/Token.dbg.json   pointer to the build-info file
//! artifacts/build-info/<id>.json                 compiler input used for verification
//! deployments/<network>/Token.json               deployment record
//! ```

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes},
};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lock file guarding writes to a network's deployment directory.
const LOCK_FILENAME: &str = ".lock";

/// Directory of hardhat build-info files, skipped when searching artifacts.
const BUILD_INFO_DIR: &str = "build-info";

/// A persisted deployment of a contract on a network.
///
/// Keyed by `(contract_name, network_name)`; at most one live record per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub contract_name: String,
    pub network_name: String,
    /// SHA-256 of the ABI-encoded constructor arguments.
    pub constructor_args_hash: String,
    /// ABI-encoded constructor arguments, exactly as appended to the creation bytecode.
    pub constructor_args: Bytes,
    /// SHA-256 of the artifact creation bytecode.
    pub bytecode_hash: String,
    pub address: Address,
    pub tx_hash: B256,
    pub block_number: u64,
    pub deployer: Address,
    /// Unix timestamp of the confirmation.
    pub deployed_at: i64,
    pub verified: bool,
}

/// A compiled contract.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    /// Compiler input, when the build-info file is available.
    pub source: Option<SourceMetadata>,
}

/// Compiler input needed to verify a contract's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    /// Fully qualified name, `<source path>:<contract name>`.
    pub fully_qualified_name: String,
    /// Compiler version in explorer format (e.g. `v0.8.24+commit.e11b9ed9`).
    pub compiler_version: String,
    /// Solidity standard JSON input.
    pub standard_json_input: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatDebugFile {
    build_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatBuildInfo {
    solc_long_version: String,
    input: Value,
}

/// Resolves contract artifacts and stores deployment records.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    artifacts: PathBuf,
    deployments: PathBuf,
}

impl ArtifactRegistry {
    pub fn new(artifacts: impl Into<PathBuf>, deployments: impl Into<PathBuf>) -> Self {
        Self {
            artifacts: artifacts.into(),
            deployments: deployments.into(),
        }
    }

    /// Resolve a contract name to its compiled artifact.
    pub fn artifact(&self, contract_name: &str) -> Result<Artifact> {
        validate_name(contract_name)?;

        let file_name = format!("{contract_name}.json");
        let mut matches = Vec::new();
        find_files(&self.artifacts, &file_name, &mut matches)?;

        let path = match matches.as_slice() {
            [] => anyhow::bail!(
                "Artifact for {} not found under {}",
                contract_name,
                self.artifacts.display()
            ),
            [path] => path.clone(),
            _ => anyhow::bail!(
                "Multiple artifacts named {} found: {}",
                contract_name,
                matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: HardhatArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let bytecode = decode_bytecode(&artifact.bytecode)
            .with_context(|| format!("Invalid bytecode in artifact {}", path.display()))?;

        let source = match load_source_metadata(&path, &artifact) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(
                    contract = %contract_name,
                    error = %e,
                    "Failed to load source metadata, verification will not be possible"
                );
                None
            }
        };

        tracing::debug!(contract = %contract_name, path = %path.display(), "Artifact resolved");

        Ok(Artifact {
            contract_name: artifact.contract_name,
            source_name: artifact.source_name,
            abi: artifact.abi,
            bytecode,
            source,
        })
    }

    fn network_dir(&self, network_name: &str) -> PathBuf {
        self.deployments.join(network_name)
    }

    fn record_path(&self, contract_name: &str, network_name: &str) -> PathBuf {
        self.network_dir(network_name)
            .join(format!("{contract_name}.json"))
    }

    /// Look up the live record of a contract on a network.
    pub fn get(&self, contract_name: &str, network_name: &str) -> Result<Option<DeploymentRecord>> {
        validate_name(contract_name)?;
        validate_name(network_name)?;

        let path = self.record_path(contract_name, network_name);
        if !path.exists() {
            return Ok(None);
        }

        load_record(&path).map(Some)
    }

    /// Insert or replace the record for `(contract_name, network_name)`.
    ///
    /// The record is written to a temporary file and renamed into place while holding an
    /// exclusive lock on the network directory, so readers never observe a partial record.
    pub fn put(&self, record: &DeploymentRecord) -> Result<()> {
        validate_name(&record.contract_name)?;
        validate_name(&record.network_name)?;

        let dir = self.network_dir(&record.network_name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create deployments directory {}", dir.display()))?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILENAME))
            .context("Failed to open deployments lock file")?;
        FileExt::lock_exclusive(&lock).context("Failed to lock deployments directory")?;

        let path = self.record_path(&record.contract_name, &record.network_name);
        let tmp_path = dir.join(format!(".{}.json.tmp", record.contract_name));

        let json = serde_json::to_string_pretty(record)
            .context("Failed to serialize deployment record")?;

        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
            std::fs::rename(&tmp_path, &path)
                .with_context(|| format!("Failed to move record into {}", path.display()))
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        FileExt::unlock(&lock).context("Failed to unlock deployments directory")?;
        result?;

        tracing::debug!(
            contract = %record.contract_name,
            network = %record.network_name,
            address = %record.address,
            verified = record.verified,
            "Deployment record saved"
        );
        Ok(())
    }

    /// All records of a network, sorted by contract name.
    pub fn list(&self, network_name: &str) -> Result<Vec<DeploymentRecord>> {
        validate_name(network_name)?;

        let dir = self.network_dir(network_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && !path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        paths.sort();

        paths.iter().map(|path| load_record(path)).collect()
    }
}

fn load_record(path: &Path) -> Result<DeploymentRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read deployment record {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse deployment record {}", path.display()))
}

/// Names become path components; reject anything that could escape the registry.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..")
    {
        anyhow::bail!("Invalid name '{}'", name);
    }
    Ok(())
}

fn find_files(dir: &Path, file_name: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == BUILD_INFO_DIR) {
                continue;
            }
            find_files(&path, file_name, found)?;
        } else if path.file_name().is_some_and(|n| n == file_name) {
            found.push(path);
        }
    }
    Ok(())
}

/// Decode creation bytecode, rejecting unlinked libraries and abstract contracts.
fn decode_bytecode(bytecode: &str) -> Result<Bytes> {
    let hex_code = bytecode.trim_start_matches("0x");
    if hex_code.contains("__") {
        anyhow::bail!("Bytecode contains unlinked library placeholders");
    }
    if hex_code.is_empty() {
        anyhow::bail!("Bytecode is empty (abstract contract or interface?)");
    }
    let bytes = hex::decode(hex_code).context("Bytecode is not valid hex")?;
    Ok(Bytes::from(bytes))
}

fn load_source_metadata(
    artifact_path: &Path,
    artifact: &HardhatArtifact,
) -> Result<Option<SourceMetadata>> {
    let dbg_path = artifact_path.with_file_name(format!("{}.dbg.json", artifact.contract_name));
    if !dbg_path.exists() {
        return Ok(None);
    }

    let dbg: HardhatDebugFile = serde_json::from_str(
        &std::fs::read_to_string(&dbg_path)
            .with_context(|| format!("Failed to read {}", dbg_path.display()))?,
    )
    .with_context(|| format!("Failed to parse {}", dbg_path.display()))?;

    let build_info_path = dbg_path
        .parent()
        .context("Debug file must have a parent directory")?
        .join(&dbg.build_info);
    let build_info: HardhatBuildInfo = serde_json::from_str(
        &std::fs::read_to_string(&build_info_path)
            .with_context(|| format!("Failed to read {}", build_info_path.display()))?,
    )
    .with_context(|| format!("Failed to parse {}", build_info_path.display()))?;

    Ok(Some(SourceMetadata {
        fully_qualified_name: format!("{}:{}", artifact.source_name, artifact.contract_name),
        compiler_version: format!("v{}", build_info.solc_long_version),
        standard_json_input: build_info.input,
    }))
}
