use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use cql_core::{NodeId, Uint256};
use cql_crypto::{Cipher, SigningKeypair};
use cql_miner::mine_once;

use crate::{KmsError, Result};

/// Working directory used when a key file is configured by bare name only.
/// Matches the daemon's default `--workdir`.
pub const DEFAULT_WORKING_DIR: &str = "./cql-data";

/// Resolve a configured key-file location.
///
/// Absolute paths and explicit relative paths are taken as given; `~/...`
/// expands against the home directory; a bare file name (`private.key`)
/// lands in the default working directory so every key artifact of a node
/// stays in one place.
pub fn resolve_key_path(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    if path.is_relative() && path.components().count() == 1 {
        return PathBuf::from(DEFAULT_WORKING_DIR).join(path);
    }
    path.to_path_buf()
}

fn master_cipher(master_key: &[u8]) -> Cipher {
    let digest = Sha256::digest(master_key);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Cipher::new(&key)
}

/// Load the local keypair from an encrypted key file, or generate and store a
/// fresh one.
///
/// The file holds the 32-byte ed25519 seed sealed with AES-256-GCM under
/// `sha256(master_key)`. An empty master key is accepted for test and dev
/// deployments.
pub fn init_local_key_pair(keyfile: &Path, master_key: &[u8]) -> Result<SigningKeypair> {
    let path = resolve_key_path(keyfile);
    let cipher = master_cipher(master_key);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(KmsError::CreateDirError)?;
        }
    }

    if path.exists() {
        let sealed = std::fs::read(&path).map_err(KmsError::ReadError)?;
        let seed = cipher
            .open(&sealed)
            .map_err(|_| KmsError::InvalidFormat("master key mismatch or corrupt keyfile".to_string()))?;
        if seed.len() != 32 {
            return Err(KmsError::InvalidFormat(format!(
                "expected 32-byte seed, got {}",
                seed.len()
            )));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&seed);
        info!(path = %path.display(), "loaded local keypair");
        return Ok(SigningKeypair::from_secret_bytes(&bytes));
    }

    let keypair = SigningKeypair::generate();
    let sealed = cipher
        .seal(&keypair.secret_key_bytes())
        .map_err(|_| KmsError::InvalidFormat("key sealing failed".to_string()))?;
    std::fs::write(&path, sealed).map_err(KmsError::WriteError)?;
    info!(path = %path.display(), "generated local keypair");
    Ok(keypair)
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    id: NodeId,
    nonce: Uint256,
}

/// Load the mined node identity from disk, or mine a fresh one for this
/// keypair and persist it.
pub fn load_or_mine_identity(
    path: &Path,
    keypair: &SigningKeypair,
    difficulty: usize,
    workers: u64,
) -> Result<(NodeId, Uint256)> {
    let path = resolve_key_path(path);

    if path.exists() {
        let bytes = std::fs::read(&path).map_err(KmsError::ReadError)?;
        let stored: StoredIdentity =
            bincode::deserialize(&bytes).map_err(|e| KmsError::InvalidFormat(e.to_string()))?;
        // identity must match the key it was mined for
        if !cql_core::verify_node_id(
            &keypair.public_key_bytes(),
            &stored.nonce,
            &stored.id,
            difficulty,
        ) {
            return Err(KmsError::InvalidFormat(
                "stored identity does not match local keypair".to_string(),
            ));
        }
        info!(id = %stored.id, "loaded node identity");
        return Ok((stored.id, stored.nonce));
    }

    info!(difficulty, "mining node identity");
    let accepted = mine_once(
        keypair.public_key_bytes().to_vec(),
        Uint256::default(),
        difficulty,
        workers,
    );
    let id = NodeId::from(accepted.hash);

    let bytes = bincode::serialize(&StoredIdentity {
        id,
        nonce: accepted.nonce,
    })
    .map_err(|e| KmsError::InvalidFormat(e.to_string()))?;
    std::fs::write(&path, bytes).map_err(KmsError::WriteError)?;
    info!(id = %id, "mined node identity");
    Ok((id, accepted.nonce))
}
