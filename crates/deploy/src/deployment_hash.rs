//! Content hashes used to decide whether an existing deployment can be reused.

use sha2::{Digest, Sha256};

/// Compute a hex-encoded SHA-256 digest of arbitrary bytes.
///
/// The hash is deterministic and used as the identity of encoded constructor arguments and
/// artifact bytecode inside a [`crate::DeploymentRecord`].
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of ABI-encoded constructor arguments.
pub fn constructor_args_hash(encoded_args: &[u8]) -> String {
    sha256_hex(encoded_args)
}

/// Hash of the creation bytecode of an artifact (without constructor arguments).
pub fn bytecode_hash(bytecode: &[u8]) -> String {
    sha256_hex(bytecode)
}
