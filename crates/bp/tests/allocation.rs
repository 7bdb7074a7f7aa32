//! End-to-end allocation scenarios against a real ring, an in-memory metric
//! map and an injectable deploy transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use cql_bp::{
    AllocError, Allocator, CreateDatabaseRequest, CreateDatabaseRequestHeader, DbService,
    DbServiceConfig, DeployCaller, DropDatabaseRequest, DropDatabaseRequestHeader, MapError,
    MemStore, NodeMetricMap, ServiceError, ServiceMap, ServiceOp, Signed, UpdateService,
};
use cql_core::{Hash, Node, NodeId, ResourceMeta, Role, Uint256};
use cql_crypto::{verify_block, verify_peers, SigningKeypair};
use cql_kms::{Kms, NodeStore};
use cql_ring::Ring;
use prometheus::proto::{Gauge, Metric, MetricFamily, MetricType};

const GB: u64 = 1 << 30;

fn gauge_family(name: &str, value: u64) -> MetricFamily {
    let mut gauge = Gauge::new();
    gauge.set_value(value as f64);
    let mut metric = Metric::new();
    metric.set_gauge(gauge);
    let mut family = MetricFamily::new();
    family.set_name(name.to_string());
    family.set_field_type(MetricType::GAUGE);
    family.mut_metric().push(metric);
    family
}

fn miner(seed: u8) -> Node {
    Node {
        id: NodeId([seed; 32]),
        public_key: [seed; 32],
        addr: format!("127.0.0.1:{}", 9000 + seed as u16),
        role: Role::Miner,
        nonce: Uint256::default(),
    }
}

/// Deploy transport that records every send and can fail one target.
#[derive(Default)]
struct MockDeploy {
    sent: Mutex<Vec<(NodeId, ServiceOp)>>,
    fail_create_on: Option<NodeId>,
}

#[async_trait]
impl DeployCaller for MockDeploy {
    async fn deploy(&self, node: NodeId, req: &UpdateService) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((node, req.header.op));
        if req.header.op == ServiceOp::CreateDb && self.fail_create_on == Some(node) {
            return Err("miner out of disk".to_string());
        }
        Ok(())
    }
}

struct Harness {
    service: DbService,
    bp_keypair: SigningKeypair,
    client_keypair: SigningKeypair,
    client_id: NodeId,
    deploy: Arc<MockDeploy>,
    service_map: Arc<ServiceMap>,
    bp_node_id: NodeId,
}

/// Five miners with the given free-memory gauges (None = no memory metric
/// published at all).
fn harness(memory: [Option<u64>; 5], fail_create_on: Option<NodeId>) -> Harness {
    let _ = cql_logging::try_init(cql_logging::Verbosity::Verbose);

    let bp_keypair = SigningKeypair::generate();
    let kms = Arc::new(Kms::new(bp_keypair.clone(), NodeStore::in_memory()));
    let bp_node_id = NodeId([0xBB; 32]);
    kms.set_local_node_id(bp_node_id, Uint256::default());

    let ring = Arc::new(Ring::new());
    ring.set_nodes((1..=5).map(miner).collect());

    let metrics = Arc::new(NodeMetricMap::new());
    for (i, mem) in memory.iter().enumerate() {
        let node = NodeId([(i + 1) as u8; 32]);
        match mem {
            Some(value) => metrics.set_metrics(
                node,
                vec![gauge_family("node_memory_MemFree_bytes", *value)],
            ),
            None => metrics.set_metrics(node, vec![gauge_family("node_load1", 1)]),
        }
    }

    let allocator = Allocator::new(kms.clone(), ring, metrics);
    let service_map = Arc::new(ServiceMap::new(Box::new(MemStore::new())));
    let deploy = Arc::new(MockDeploy {
        sent: Mutex::new(Vec::new()),
        fail_create_on,
    });

    let service = DbService::new(
        kms,
        allocator,
        service_map.clone(),
        deploy.clone(),
        DbServiceConfig::default(),
    );

    let client_keypair = SigningKeypair::generate();
    Harness {
        service,
        bp_keypair,
        client_keypair,
        client_id: NodeId([0xCC; 32]),
        deploy,
        service_map,
        bp_node_id,
    }
}

fn create_request(h: &Harness, node: u32, memory: u64) -> CreateDatabaseRequest {
    let mut req: CreateDatabaseRequest = Signed::new(CreateDatabaseRequestHeader {
        node_id: h.client_id,
        resource_meta: ResourceMeta {
            node,
            memory,
            ..Default::default()
        },
    });
    req.sign(&h.client_keypair).unwrap();
    req
}

// ==================== S1: happy allocation ====================

#[tokio::test]
async fn happy_allocation_picks_largest_memory() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let resp = h
        .service
        .create_database(create_request(&h, 3, 3 * GB))
        .await
        .unwrap();
    assert!(resp.verify().is_ok());
    assert_eq!(resp.signee, h.bp_keypair.public_key_bytes());

    let instance = &resp.header.instance;
    let peers = &instance.peers;

    // quorum of three, leader is the 8G node, term starts at 1
    assert_eq!(peers.servers.len(), 3);
    assert_eq!(peers.term, 1);
    assert_eq!(peers.leader, NodeId([1u8; 32]));
    let ids: Vec<NodeId> = peers.node_ids();
    assert_eq!(
        ids,
        vec![NodeId([1u8; 32]), NodeId([2u8; 32]), NodeId([3u8; 32])]
    );
    assert_eq!(
        peers.servers.iter().filter(|s| s.role == Role::Leader).count(),
        1
    );
    assert!(verify_peers(peers).is_ok());

    // signed genesis block produced by this block producer
    let genesis = instance.genesis_block.as_ref().unwrap();
    assert!(verify_block(genesis).is_ok());
    assert_eq!(genesis.header.producer, h.bp_node_id);
    assert_eq!(genesis.header.genesis_hash, Hash::zero());
    assert_eq!(genesis.header.parent_hash, Hash::zero());

    // the instance is registered
    assert!(h.service_map.contains(&instance.id));

    // every chosen miner received the create
    let sent = h.deploy.sent.lock().unwrap();
    let creates: Vec<NodeId> = sent
        .iter()
        .filter(|(_, op)| *op == ServiceOp::CreateDb)
        .map(|(n, _)| *n)
        .collect();
    assert_eq!(creates.len(), 3);
    for id in ids {
        assert!(creates.contains(&id));
    }
}

// ==================== S2: memory gate exhausts rounds ====================

#[tokio::test]
async fn memory_gate_exhausts_allocation() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    // only the 8G and 6G nodes clear a 5G floor: 2 < 3 on every round
    let result = h.service.create_database(create_request(&h, 3, 5 * GB)).await;
    assert!(matches!(
        result,
        Err(ServiceError::Alloc(AllocError::AllocationExhausted))
    ));

    // nothing deployed, nothing registered
    assert!(h.deploy.sent.lock().unwrap().is_empty());
    assert!(h.service_map.is_empty());
}

// ==================== S3: missing metric excludes the node ====================

#[tokio::test]
async fn missing_metric_excludes_node_permanently() {
    // the 8G node publishes no free-memory key at all
    let h = harness(
        [None, Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let resp = h
        .service
        .create_database(create_request(&h, 3, 2 * GB))
        .await
        .unwrap();
    let peers = &resp.header.instance.peers;

    // metric-less node 1 is out; leadership falls to the 6G node
    assert_eq!(peers.leader, NodeId([2u8; 32]));
    assert_eq!(
        peers.node_ids(),
        vec![NodeId([2u8; 32]), NodeId([3u8; 32]), NodeId([4u8; 32])]
    );
}

// ==================== S6: deploy failure rolls back everywhere ====================

#[tokio::test]
async fn deploy_failure_rolls_back_full_target_set() {
    // second-ranked miner (6G) refuses the create
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        Some(NodeId([2u8; 32])),
    );

    let result = h.service.create_database(create_request(&h, 3, 3 * GB)).await;
    match result {
        Err(ServiceError::DeployFailed(message)) => {
            assert!(message.contains("miner out of disk"));
        }
        other => panic!("expected deploy failure, got {:?}", other.map(|_| ())),
    }

    let sent = h.deploy.sent.lock().unwrap();
    let targets = [NodeId([1u8; 32]), NodeId([2u8; 32]), NodeId([3u8; 32])];

    // all three got the create attempt...
    for node in targets {
        assert!(sent.iter().any(|(n, op)| *n == node && *op == ServiceOp::CreateDb));
    }
    // ...and all three got the rollback, including the ones that succeeded
    for node in targets {
        assert!(sent.iter().any(|(n, op)| *n == node && *op == ServiceOp::DropDb));
    }

    // the failed instance never reaches the registry
    assert!(h.service_map.is_empty());
}

// ==================== property 2: database id mining ====================

#[tokio::test]
async fn database_id_meets_difficulty_and_is_unique() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let first = h
        .service
        .create_database(create_request(&h, 3, 3 * GB))
        .await
        .unwrap();
    let first_id = first.header.instance.id.clone();

    let hash = Hash::from_hex(&first_id).unwrap();
    assert!(hash.leading_zero_bits() >= cql_bp::DATABASE_ID_DIFFICULTY);

    // a second creation for the same requester must not collide
    let second_id = h.service.generate_database_id(&h.client_id);
    assert_ne!(first_id, second_id);
    assert!(Hash::from_hex(&second_id).unwrap().leading_zero_bits() >= 4);
}

// ==================== property 6: drop removes everywhere ====================

#[tokio::test]
async fn drop_database_removes_from_registry_and_index() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let created = h
        .service
        .create_database(create_request(&h, 3, 3 * GB))
        .await
        .unwrap();
    let id = created.header.instance.id.clone();
    let members = created.header.instance.peers.node_ids();

    let mut drop_req: DropDatabaseRequest = Signed::new(DropDatabaseRequestHeader {
        node_id: h.client_id,
        database_id: id.clone(),
    });
    drop_req.sign(&h.client_keypair).unwrap();

    let resp = h.service.drop_database(drop_req).await.unwrap();
    assert!(resp.verify().is_ok());

    assert!(matches!(
        h.service_map.get(&id),
        Err(MapError::NotFound(_))
    ));
    for node in members {
        assert!(h
            .service_map
            .get_databases(&node)
            .iter()
            .all(|i| i.id != id));
    }
}

// ==================== allocator-level properties ====================

#[tokio::test]
async fn term_increments_from_last_term() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    // drive the allocator directly for a later placement of the same id
    let kms = Arc::new(Kms::new(h.bp_keypair.clone(), NodeStore::in_memory()));
    kms.set_local_node_id(h.bp_node_id, Uint256::default());
    let ring = Arc::new(Ring::new());
    ring.set_nodes((1..=5).map(miner).collect());
    let metrics = Arc::new(NodeMetricMap::new());
    for i in 1..=5u8 {
        metrics.set_metrics(
            NodeId([i; 32]),
            vec![gauge_family("node_memory_MemFree_bytes", 8 * GB)],
        );
    }
    let allocator = Allocator::new(kms, ring, metrics);

    let meta = ResourceMeta {
        node: 3,
        memory: GB,
        ..Default::default()
    };
    let peers = allocator.allocate(4, "same-database", &meta).unwrap();
    assert_eq!(peers.term, 5);
}

#[tokio::test]
async fn zero_quorum_is_rejected() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let result = h.service.create_database(create_request(&h, 0, GB)).await;
    assert!(matches!(
        result,
        Err(ServiceError::Alloc(AllocError::AllocationExhausted))
    ));
}

#[tokio::test]
async fn unsigned_create_request_rejected() {
    let h = harness(
        [Some(8 * GB), Some(6 * GB), Some(4 * GB), Some(2 * GB), Some(GB)],
        None,
    );

    let req: CreateDatabaseRequest = Signed::new(CreateDatabaseRequestHeader {
        node_id: h.client_id,
        resource_meta: ResourceMeta {
            node: 3,
            memory: GB,
            ..Default::default()
        },
    });
    // never signed
    let result = h.service.create_database(req).await;
    assert!(matches!(result, Err(ServiceError::Core(_))));
    assert!(h.deploy.sent.lock().unwrap().is_empty());
}
