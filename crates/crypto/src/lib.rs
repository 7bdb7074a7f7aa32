//! CovenantSQL crypto
//!
//! Thin providers over the cryptographic primitives the control plane
//! consumes:
//! - ed25519 signing keypairs and detached signatures
//! - ECDH shared-secret derivation between node keypairs (with the well-known
//!   anonymous keypair for directory-bootstrap dials)
//! - AES-256-GCM frame sealing for the encrypted transport

mod cipher;
mod keys;
mod secret;
mod sign;

pub use cipher::{Cipher, CipherError, NONCE_LEN, TAG_LEN};
pub use keys::SigningKeypair;
pub use secret::{anonymous_keypair, shared_secret, SecretError};
pub use sign::{
    sign_block, sign_detached, sign_peers, verify_block, verify_detached, verify_peers,
};
