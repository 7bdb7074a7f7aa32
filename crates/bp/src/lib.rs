//! CovenantSQL block-producer control plane
//!
//! The subsystem that turns a `CreateDatabase` request into a running
//! database instance:
//! - mine a unique database id off the requester's identity
//! - allocate a quorum of miner nodes from the placement ring, gated by live
//!   free-memory metrics
//! - assemble and sign the genesis block
//! - fan out the signed deploy to every chosen miner, rolling back
//!   best-effort on failure
//! - persist the instance through the service map's commit store
//!
//! The miner-side `DBS.Deploy` handler lives here too since both ends share
//! the `UpdateService` wire types.

mod alloc;
mod deploy;
mod metrics;
mod service;
mod service_map;
mod types;
mod worker;

pub use alloc::{AllocError, Allocator};
pub use deploy::{batch_send_svc_req, DeployCaller, RpcDeployCaller, DEPLOY_METHOD};
pub use metrics::{MetricError, NodeMetricMap, METRIC_KEYS_FREE_MEMORY};
pub use service::{DbService, DbServiceConfig, ServiceError, BPDB_SERVICE_NAME};
pub use service_map::{CommitStore, FileStore, MapError, MemStore, ServiceMap, StoreError};
pub use types::{
    CreateDatabaseRequest, CreateDatabaseRequestHeader, CreateDatabaseResponse,
    CreateDatabaseResponseHeader, DropDatabaseRequest, DropDatabaseRequestHeader,
    DropDatabaseResponse, DropDatabaseResponseHeader, GetDatabaseRequest,
    GetDatabaseRequestHeader, GetDatabaseResponse, GetDatabaseResponseHeader, InitServiceRequest,
    InitServiceRequestHeader, InitServiceResponse, InitServiceResponseHeader, ServiceOp, Signed,
    UpdateService, UpdateServiceHeader, UpdateServiceResponse, UpdateServiceResponseHeader,
};
pub use worker::{DbsService, DBS_SERVICE_NAME};

/// Default number of allocation rounds before giving up
pub const DEFAULT_ALLOCATION_ROUNDS: usize = 3;

/// Proof-of-work difficulty for generated database ids
pub const DATABASE_ID_DIFFICULTY: usize = 4;
