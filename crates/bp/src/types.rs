//! Wire types for the `BPDB` and `DBS` services.
//!
//! Every request and response is a [`Signed`] header: the signature covers
//! the canonical encoding of the header fields plus the signer's public key,
//! never the signature itself.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use cql_core::{
    CoreError, DatabaseId, NodeId, PublicKey, ResourceMeta, ServiceInstance, Signature,
};
use cql_crypto::{sign_detached, verify_detached, SigningKeypair};

/// A header plus the detached signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<H> {
    pub header: H,
    /// Public key of the signer
    pub signee: PublicKey,
    #[serde(with = "BigArray")]
    pub signature: Signature,
}

impl<H: Serialize + DeserializeOwned> Signed<H> {
    /// Wrap an unsigned header. `sign` must be called before sending.
    pub fn new(header: H) -> Self {
        Signed {
            header,
            signee: [0u8; 32],
            signature: [0u8; 64],
        }
    }

    fn signable_data(&self) -> Result<Vec<u8>, CoreError> {
        bincode::serialize(&(&self.header, &self.signee))
            .map_err(|e| CoreError::Encoding(e.to_string()))
    }

    pub fn sign(&mut self, keypair: &SigningKeypair) -> Result<(), CoreError> {
        self.signee = keypair.public_key_bytes();
        let data = self.signable_data()?;
        self.signature = sign_detached(keypair, &data);
        Ok(())
    }

    pub fn verify(&self) -> Result<(), CoreError> {
        let data = self.signable_data()?;
        verify_detached(&self.signee, &data, &self.signature)
    }
}

// ==================== BPDB methods ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatabaseRequestHeader {
    /// Identity of the requesting node; also the database id mining preimage
    pub node_id: NodeId,
    pub resource_meta: ResourceMeta,
}

pub type CreateDatabaseRequest = Signed<CreateDatabaseRequestHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatabaseResponseHeader {
    pub instance: ServiceInstance,
}

pub type CreateDatabaseResponse = Signed<CreateDatabaseResponseHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropDatabaseRequestHeader {
    pub node_id: NodeId,
    pub database_id: DatabaseId,
}

pub type DropDatabaseRequest = Signed<DropDatabaseRequestHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropDatabaseResponseHeader {}

pub type DropDatabaseResponse = Signed<DropDatabaseResponseHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDatabaseRequestHeader {
    pub node_id: NodeId,
    pub database_id: DatabaseId,
}

pub type GetDatabaseRequest = Signed<GetDatabaseRequestHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDatabaseResponseHeader {
    pub instance: ServiceInstance,
}

pub type GetDatabaseResponse = Signed<GetDatabaseResponseHeader>;

/// `BPDB.GetNodeDatabases` request: a miner asking which instances it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitServiceRequestHeader {
    pub node_id: NodeId,
}

pub type InitServiceRequest = Signed<InitServiceRequestHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitServiceResponseHeader {
    pub instances: Vec<ServiceInstance>,
}

pub type InitServiceResponse = Signed<InitServiceResponseHeader>;

// ==================== DBS methods (served on miners) ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceOp {
    CreateDb,
    DropDb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateServiceHeader {
    pub op: ServiceOp,
    pub instance: ServiceInstance,
}

pub type UpdateService = Signed<UpdateServiceHeader>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateServiceResponseHeader {}

pub type UpdateServiceResponse = Signed<UpdateServiceResponseHeader>;
