// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wires every subsystem together in dependency order, the same shape as
//! the teacher's `AuthorityNode::start`: construct the storage layer, then
//! execution, then the journal, then networking, then the consensus
//! endpoint, handing each a handle to whatever it depends on rather than a
//! shared god-object.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use prometheus::Registry;
use tonic::transport::Server;

use validator_consensus::ConsensusInterface;
use validator_execution::{ComponentEndpoint, ContextRegistry, Executor, ParallelScheduler, ProcessorRegistry};
use validator_journal::{BatchPool, BlockPublisher, BlockValidator, ChainController, ConsensusMetrics, EventBus, ExecutionMetrics, GossipBridge};
use validator_network::{AuthorizationScheme, NetworkMetrics, PeerEndpoint, PeerTable};
use validator_permissions::{OffChainRoles, PermissionVerifier};
use validator_storage::{BlockStore, KvStore, StorageMetrics, TrieReader, TrieWriter};
use validator_types::crypto::Signer;

use crate::config::NodeConfig;
use crate::engine_router::EngineRouter;
use crate::error::{NodeError, Result};
use crate::{genesis, identity};

/// The component endpoint's listener task, started in [`NodeContext::build`]
/// so transaction processors have somewhere to connect to before genesis
/// waits on them, and handed to `supervisor::run` to fold into its own
/// listener set rather than bind a second one.
pub type ComponentListenerHandle = tokio::task::JoinHandle<std::result::Result<(), tonic::transport::Error>>;

pub(crate) fn parse_addr(label: &str, value: &str) -> Result<SocketAddr> {
    value.parse().map_err(|_| NodeError::GenesisInvalid(format!("invalid {label} address {value}")))
}

/// Every long-lived subsystem a running validator needs, built once at
/// startup and handed to the supervisor to serve.
pub struct NodeContext {
    pub config: NodeConfig,
    pub storage_metrics: Arc<StorageMetrics>,
    pub execution_metrics: Arc<ExecutionMetrics>,
    pub network_metrics: Arc<NetworkMetrics>,
    pub consensus_metrics: Arc<ConsensusMetrics>,
    pub kv: KvStore,
    pub block_store: BlockStore,
    pub peer_table: Arc<PeerTable>,
    pub verifier: Arc<PermissionVerifier>,
    pub registry: Arc<ProcessorRegistry>,
    pub contexts: ContextRegistry,
    pub consensus: ConsensusInterface,
    pub chain_controller: ChainController,
    pub batch_pool: Arc<BatchPool>,
    pub publisher: Arc<BlockPublisher>,
    pub peer_endpoint: Arc<PeerEndpoint>,
    pub router: Arc<EngineRouter>,
    /// Identity used for outbound peer dials; distinct `Signer` value from
    /// the block publisher's, reconstructed from the same secret key.
    pub network_identity: Arc<Signer>,
}

impl NodeContext {
    pub async fn build(config: NodeConfig, registry: &Registry) -> Result<(Self, ComponentListenerHandle)> {
        let storage_metrics = Arc::new(StorageMetrics::new(registry));
        let execution_metrics = Arc::new(ExecutionMetrics::new(registry));
        let network_metrics = Arc::new(NetworkMetrics::new(registry));
        let consensus_metrics = Arc::new(ConsensusMetrics::new(registry));

        let data_dir: PathBuf = config.storage.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;
        let kv = KvStore::open(data_dir.join("db"))?;
        let block_store = BlockStore::new(kv.clone()).with_metrics(storage_metrics.clone());

        let secret_bytes = identity::load_or_generate(&data_dir)?;
        let genesis_signer = identity::signer_from_bytes(&secret_bytes)?;
        let publisher_signer = identity::signer_from_bytes(&secret_bytes)?;
        let network_identity = Arc::new(identity::signer_from_bytes(&secret_bytes)?);

        let processor_registry = Arc::new(ProcessorRegistry::new());
        let executor = Arc::new(Executor::new(processor_registry.clone()));
        let scheduler = Arc::new(ParallelScheduler::new(executor));
        let contexts = ContextRegistry::new();

        // Bind the component endpoint before genesis runs: a genesis batch
        // that seeds real transactions needs a processor to connect and
        // register before it can execute, and nothing can connect to an
        // endpoint that isn't listening yet.
        let component_addr = parse_addr("bind_component", &config.execution.bind_component)?;
        let component_endpoint = ComponentEndpoint::new(processor_registry.clone(), contexts.clone());
        let component_listener = tokio::spawn(async move {
            Server::builder()
                .add_service(validator_execution::proto::component_service_server::ComponentServiceServer::new(component_endpoint))
                .serve(component_addr)
                .await
        });

        genesis::apply_if_needed(
            config.genesis.genesis_batch.as_deref(),
            &kv,
            &TrieWriter::new(&kv),
            &block_store,
            &genesis_signer,
            &scheduler,
            &processor_registry,
            config.genesis.wait_timeout(),
        )
        .await?;

        let verifier = {
            let kv_for_reader = kv.clone();
            Arc::new(PermissionVerifier::new(move |root| TrieReader::new(&kv_for_reader, root), OffChainRoles::default()))
        };

        let consensus = ConsensusInterface::start();
        let engine_link: Arc<dyn validator_consensus::ConsensusEngineLink> = Arc::new(consensus.clone());

        let validator = Arc::new(BlockValidator::new(
            kv.clone(),
            TrieWriter::new(&kv),
            block_store.clone(),
            scheduler.clone(),
            verifier.clone(),
            engine_link.clone(),
        ));

        let events = EventBus::new();
        let chain_controller = ChainController::start(
            block_store.clone(),
            validator,
            verifier.clone(),
            engine_link.clone(),
            events,
            consensus_metrics.clone(),
        );

        let batch_pool = Arc::new(BatchPool::new(verifier.clone(), BATCH_POOL_CAPACITY).with_metrics(execution_metrics.clone()));

        let publisher = Arc::new(BlockPublisher::new(
            kv.clone(),
            TrieWriter::new(&kv),
            block_store.clone(),
            scheduler,
            verifier.clone(),
            batch_pool.clone(),
            publisher_signer,
            Vec::new(),
        ));

        let peer_table = Arc::new(PeerTable::new(config.network.peering_mode()).with_metrics(network_metrics.clone()));

        let router = Arc::new(EngineRouter::new(
            publisher.clone(),
            chain_controller.clone(),
            block_store.clone(),
            peer_table.clone(),
            engine_link.clone(),
        ));

        let gossip_bridge = Arc::new(GossipBridge::new(chain_controller.clone(), batch_pool.clone()));
        let scheme = if config.network.challenge_authorization { AuthorizationScheme::Challenge } else { AuthorizationScheme::Trust };
        let state_root_fn: Arc<dyn Fn() -> validator_permissions::StateRoot + Send + Sync> = {
            let controller = chain_controller.clone();
            Arc::new(move || controller.head_state_root())
        };
        let peer_endpoint = Arc::new(PeerEndpoint::new(
            peer_table.clone(),
            verifier.clone(),
            scheme,
            state_root_fn,
            Arc::new(chain_controller.clone()),
            gossip_bridge,
            Some(engine_link),
        ));

        let context = Self {
            config,
            storage_metrics,
            execution_metrics,
            network_metrics,
            consensus_metrics,
            kv,
            block_store,
            peer_table,
            verifier,
            registry: processor_registry,
            contexts,
            consensus,
            chain_controller,
            batch_pool,
            publisher,
            peer_endpoint,
            router,
            network_identity,
        };
        Ok((context, component_listener))
    }
}

/// Cap on the pending batch pool's size; unbounded intake would let a
/// slow-draining candidate builder back up into unbounded memory use.
const BATCH_POOL_CAPACITY: usize = 10_000;
