//! CovenantSQL daemon
//!
//! Runs a node in block-producer mode (serving `BPDB`) or miner mode
//! (serving `DBS.Deploy`). Key material lives under the working directory:
//! `private.key` (sealed with the master key), `public.keystore` (the node
//! directory) and `node.id` (the mined identity).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use cql_bp::{
    Allocator, DbService, DbServiceConfig, DbsService, FileStore, NodeMetricMap, RpcDeployCaller,
    ServiceMap, BPDB_SERVICE_NAME, DBS_SERVICE_NAME,
};
use cql_core::{Node, Role, DEFAULT_NODE_ID_DIFFICULTY};
use cql_kms::{
    init_local_key_pair, load_or_mine_identity, Kms, NodeStore, DEFAULT_WORKING_DIR,
};
use cql_logging::Verbosity;
use cql_ring::Ring;
use cql_rpc::{Caller, RpcServer, SessionPool};

/// Default listen endpoint for block producers
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:2120";

/// CovenantSQL block producer / miner daemon
#[derive(Parser)]
#[command(name = "cqld")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Working directory for keys and state
    #[arg(long, default_value = DEFAULT_WORKING_DIR)]
    workdir: PathBuf,

    /// Run as a miner (serve DBS.Deploy) instead of a block producer
    #[arg(long)]
    miner: bool,

    /// File holding the master key protecting the private key. Omitted means
    /// an empty master key (dev mode).
    #[arg(long)]
    master_key_file: Option<PathBuf>,

    /// Prompt for the master key on stdin instead of reading a file
    #[arg(long, conflicts_with = "master_key_file")]
    ask_master_key: bool,

    /// Proof-of-work difficulty for node identities
    #[arg(long, default_value_t = DEFAULT_NODE_ID_DIFFICULTY)]
    difficulty: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cql_logging::init(Verbosity::from_flag(cli.verbose));

    std::fs::create_dir_all(&cli.workdir)
        .with_context(|| format!("creating workdir {}", cli.workdir.display()))?;

    let master_key = match &cli.master_key_file {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("reading master key {}", path.display()))?,
        None if cli.ask_master_key => {
            eprint!("Type in master key to continue: ");
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("reading master key from stdin")?;
            line.trim_end_matches(|c| c == '\r' || c == '\n')
                .as_bytes()
                .to_vec()
        }
        None => Vec::new(),
    };

    // key bootstrap: sealed private key, public keystore, mined identity
    let keypair = init_local_key_pair(&cli.workdir.join("private.key"), &master_key)?;
    let store = NodeStore::open(&cli.workdir.join("public.keystore"))?;
    let (node_id, nonce) = load_or_mine_identity(
        &cli.workdir.join("node.id"),
        &keypair,
        cli.difficulty,
        4,
    )?;
    info!(id = %node_id, miner = cli.miner, "node identity ready");

    let role = if cli.miner { Role::Miner } else { Role::Leader };
    store.set_node(Node {
        id: node_id,
        public_key: keypair.public_key_bytes(),
        addr: cli.listen.clone(),
        role,
        nonce,
    })?;

    let kms = Arc::new(Kms::new(keypair.clone(), store));
    kms.set_local_node_id(node_id, nonce);

    let server = RpcServer::new(kms.clone(), cli.difficulty);

    if cli.miner {
        let dbs = Arc::new(DbsService::new(Arc::new(keypair)));
        server.register_service(DBS_SERVICE_NAME, dbs);
    } else {
        // membership feed for the placement ring comes from the keystore
        let ring = Arc::new(Ring::new());
        ring.set_nodes(kms.store().nodes());

        let metrics = Arc::new(NodeMetricMap::new());
        let allocator = Allocator::new(kms.clone(), ring, metrics);

        let service_map = Arc::new(ServiceMap::new(Box::new(FileStore::open(
            &cli.workdir.join("service.db"),
        )?)));
        let rehydrated = service_map.rehydrate()?;
        info!(instances = rehydrated, "service registry loaded");

        let pool = SessionPool::new(kms.clone());
        let caller = Arc::new(Caller::new(kms.clone(), pool));
        let deploy = Arc::new(RpcDeployCaller { caller });

        let bpdb = Arc::new(DbService::new(
            kms.clone(),
            allocator,
            service_map,
            deploy,
            DbServiceConfig::default(),
        ));
        server.register_service(BPDB_SERVICE_NAME, bpdb);
    }

    let listener = TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, "cqld started");

    let serve = tokio::spawn(server.serve(listener));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    serve.abort();

    Ok(())
}
