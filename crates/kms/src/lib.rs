//! CovenantSQL key management service
//!
//! Owns everything identity-shaped on a node:
//! - the local keypair, loaded from a master-key-encrypted key file
//! - the local node id and its proof-of-work nonce
//! - the public keystore mapping node ids to public keys and addresses
//! - shared-secret derivation against remote identities, including the
//!   anonymous mode used for directory-bootstrap RPCs

mod local;
mod store;

pub use local::{
    init_local_key_pair, load_or_mine_identity, resolve_key_path, DEFAULT_WORKING_DIR,
};
pub use store::NodeStore;

use std::sync::RwLock;

use thiserror::Error;

use cql_core::{Node, NodeId, Uint256};
use cql_crypto::{anonymous_keypair, shared_secret, SigningKeypair};

#[derive(Error, Debug)]
pub enum KmsError {
    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),

    #[error("Local node identity not set")]
    LocalIdentityUnset,

    #[error("Failed to read keyfile: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write keyfile: {0}")]
    WriteError(std::io::Error),

    #[error("Invalid keyfile format: {0}")]
    InvalidFormat(String),

    #[error("Failed to create directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Key exchange failed: {0}")]
    KeyExchange(#[from] cql_crypto::SecretError),
}

pub type Result<T> = std::result::Result<T, KmsError>;

/// Identity and key service shared by the transport and the block-producer
/// service.
pub struct Kms {
    keypair: SigningKeypair,
    local: RwLock<Option<(NodeId, Uint256)>>,
    store: NodeStore,
}

impl Kms {
    pub fn new(keypair: SigningKeypair, store: NodeStore) -> Self {
        Kms {
            keypair,
            local: RwLock::new(None),
            store,
        }
    }

    pub fn local_keypair(&self) -> &SigningKeypair {
        &self.keypair
    }

    pub fn local_public_key(&self) -> [u8; 32] {
        self.keypair.public_key_bytes()
    }

    pub fn set_local_node_id(&self, id: NodeId, nonce: Uint256) {
        *self.local.write().expect("kms lock poisoned") = Some((id, nonce));
    }

    pub fn local_node_id(&self) -> Result<NodeId> {
        self.local
            .read()
            .expect("kms lock poisoned")
            .map(|(id, _)| id)
            .ok_or(KmsError::LocalIdentityUnset)
    }

    pub fn local_nonce(&self) -> Result<Uint256> {
        self.local
            .read()
            .expect("kms lock poisoned")
            .map(|(_, nonce)| nonce)
            .ok_or(KmsError::LocalIdentityUnset)
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        self.store.get_node(id)
    }

    pub fn get_node_addr(&self, id: &NodeId) -> Result<String> {
        Ok(self.store.get_node(id)?.addr)
    }

    /// Symmetric transport key shared with `remote_id`.
    ///
    /// On the accept side of an anonymous dial the remote id is the anonymous
    /// sentinel and the well-known anonymous public key stands in for the
    /// peer; on an anonymous dial-out the anonymous keypair stands in for the
    /// local identity.
    pub fn get_shared_secret_with(&self, remote_id: &NodeId, is_anonymous: bool) -> Result<[u8; 32]> {
        if remote_id.is_anonymous() {
            let key = shared_secret(&self.keypair, &anonymous_keypair().public_key_bytes())?;
            return Ok(key);
        }

        let remote = self
            .store
            .get_node(remote_id)
            .map_err(|_| KmsError::UnknownPeer(*remote_id))?;

        let key = if is_anonymous {
            shared_secret(&anonymous_keypair(), &remote.public_key)?
        } else {
            shared_secret(&self.keypair, &remote.public_key)?
        };
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_core::Role;

    fn test_node(keypair: &SigningKeypair, seed: u8) -> Node {
        Node {
            id: NodeId([seed; 32]),
            public_key: keypair.public_key_bytes(),
            addr: format!("127.0.0.1:{}", 9000 + seed as u16),
            role: Role::Miner,
            nonce: Uint256::default(),
        }
    }

    #[test]
    fn test_local_identity_roundtrip() {
        let kms = Kms::new(SigningKeypair::generate(), NodeStore::in_memory());

        assert!(matches!(
            kms.local_node_id(),
            Err(KmsError::LocalIdentityUnset)
        ));

        kms.set_local_node_id(NodeId([1u8; 32]), Uint256::from(42));
        assert_eq!(kms.local_node_id().unwrap(), NodeId([1u8; 32]));
        assert_eq!(kms.local_nonce().unwrap(), Uint256::from(42));
    }

    #[test]
    fn test_shared_secret_requires_known_peer() {
        let kms = Kms::new(SigningKeypair::generate(), NodeStore::in_memory());
        let missing = NodeId([9u8; 32]);

        assert!(matches!(
            kms.get_shared_secret_with(&missing, false),
            Err(KmsError::UnknownPeer(id)) if id == missing
        ));
    }

    #[test]
    fn test_shared_secret_both_directions() {
        let alice = SigningKeypair::generate();
        let bob = SigningKeypair::generate();

        let alice_kms = Kms::new(alice.clone(), NodeStore::in_memory());
        let bob_kms = Kms::new(bob.clone(), NodeStore::in_memory());

        alice_kms.store().set_node(test_node(&bob, 2)).unwrap();
        bob_kms.store().set_node(test_node(&alice, 1)).unwrap();

        let k1 = alice_kms
            .get_shared_secret_with(&NodeId([2u8; 32]), false)
            .unwrap();
        let k2 = bob_kms
            .get_shared_secret_with(&NodeId([1u8; 32]), false)
            .unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_anonymous_secret_matches() {
        let server = SigningKeypair::generate();
        let server_kms = Kms::new(server.clone(), NodeStore::in_memory());

        // dialer only knows the server's directory entry
        let dialer_kms = Kms::new(SigningKeypair::generate(), NodeStore::in_memory());
        dialer_kms.store().set_node(test_node(&server, 2)).unwrap();

        let dialer_key = dialer_kms
            .get_shared_secret_with(&NodeId([2u8; 32]), true)
            .unwrap();
        let server_key = server_kms
            .get_shared_secret_with(&cql_core::ANONYMOUS_NODE_ID, false)
            .unwrap();
        assert_eq!(dialer_key, server_key);
    }
}
