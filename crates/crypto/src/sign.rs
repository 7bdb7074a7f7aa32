//! Detached ed25519 signatures over control-plane structures.
//!
//! Every signed structure exposes its canonical signable bytes; the helpers
//! here attach or check the detached signature and report failures as
//! `InvalidSignature` like the rest of the verification pipeline.

use ed25519_dalek::{Signature as DalekSignature, Signer, Verifier, VerifyingKey};

use cql_core::{Block, CoreError, Peers, PublicKey, Signature};

use crate::keys::SigningKeypair;

/// Produce a detached signature over `data` with the local key.
pub fn sign_detached(keypair: &SigningKeypair, data: &[u8]) -> Signature {
    keypair.signing_key.sign(data).to_bytes()
}

/// Check a detached signature against a signer's public key.
///
/// An undecodable public key and a mismatched signature are the same failure
/// from the caller's point of view: the claimed signer did not produce these
/// bytes.
pub fn verify_detached(
    public_key: &PublicKey,
    data: &[u8],
    signature: &Signature,
) -> Result<(), CoreError> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| CoreError::InvalidSignature)?;
    verifying_key
        .verify(data, &DalekSignature::from_bytes(signature))
        .map_err(|_| CoreError::InvalidSignature)
}

/// Sign a peers set with the constructing block producer's key.
///
/// Sets the embedded public key first so the signature covers it.
pub fn sign_peers(keypair: &SigningKeypair, peers: &mut Peers) -> Result<(), CoreError> {
    peers.public_key = keypair.public_key_bytes();
    let data = peers.signable_data()?;
    peers.signature = sign_detached(keypair, &data);
    Ok(())
}

/// Verify a peers set against its embedded public key.
pub fn verify_peers(peers: &Peers) -> Result<(), CoreError> {
    let data = peers.signable_data()?;
    verify_detached(&peers.public_key, &data, &peers.signature)
}

/// Sign a block's header hash.
pub fn sign_block(keypair: &SigningKeypair, block: &mut Block) -> Result<(), CoreError> {
    block.signee = keypair.public_key_bytes();
    let hash = block.header_hash()?;
    block.signature = sign_detached(keypair, hash.as_bytes());
    Ok(())
}

/// Verify a block's signature against its signee.
pub fn verify_block(block: &Block) -> Result<(), CoreError> {
    let hash = block.header_hash()?;
    verify_detached(&block.signee, hash.as_bytes(), &block.signature)
}
