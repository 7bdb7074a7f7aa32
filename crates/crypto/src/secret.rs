use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::keys::SigningKeypair;

/// Seed of the well-known anonymous keypair. Anonymous dials derive their
/// transport key from this pair instead of the local node identity, which lets
/// a node reach directory-bootstrap RPCs before it is registered anywhere.
const ANONYMOUS_SEED: [u8; 32] = [0x3F; 32];

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Remote public key is not a valid curve point")]
    InvalidRemoteKey,
}

/// The well-known anonymous keypair. Both sides of an anonymous connection
/// substitute it for the dialer's identity, so the derived secret only
/// authenticates the acceptor.
pub fn anonymous_keypair() -> SigningKeypair {
    SigningKeypair::from_secret_bytes(&ANONYMOUS_SEED)
}

/// Derive the 32-byte symmetric transport key shared with a remote node.
///
/// X25519 between the local clamped scalar and the remote key mapped to its
/// Montgomery form, finalized with SHA-256. The output is deterministic for a
/// key pair; per-connection randomness comes from the transport's random
/// frame nonces, never from here.
pub fn shared_secret(
    local: &SigningKeypair,
    remote_public: &[u8; 32],
) -> Result<[u8; 32], SecretError> {
    let remote = VerifyingKey::from_bytes(remote_public).map_err(|_| SecretError::InvalidRemoteKey)?;
    let scalar = local.signing_key.to_scalar_bytes();
    let point = x25519_dalek::x25519(scalar, remote.to_montgomery().to_bytes());

    let digest = Sha256::digest(point);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(key)
}
