//! The zip service: daemon lifecycle, tip tracking, notifications and the
//! query façade behind one handle.

use std::sync::{Arc, Mutex};

use futures_util::future::try_join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use zipcore_rpc::{DaemonRpc, HttpRpcClient, RpcEndpoint};
use zipcore_types::Network;

use crate::cache::CacheSet;
use crate::chain_queries::BlockRef;
use crate::config::{ConnectConfig, ServiceConfig, SpawnConfig};
use crate::daemon_conf::SpawnConfiguration;
use crate::events::{EventBus, ServiceEvent};
use crate::metrics::ServiceMetrics;
use crate::node_record::NodeRecord;
use crate::pool::NodePool;
use crate::shutdown::ShutdownController;
use crate::subscriptions::{PublishEvent, Subscriber, Topic};
use crate::supervisor::{verify_connection, Supervisor, SupervisorTiming};
use crate::tip::TipTracker;
use crate::zmq_bridge::EventBridge;
use crate::NodeError;

pub struct ZipService {
    pub(crate) config: ServiceConfig,
    pub(crate) pool: Arc<NodePool>,
    pub(crate) caches: Arc<CacheSet>,
    pub(crate) tip: Arc<TipTracker>,
    events: Arc<EventBus>,
    shutdown: Arc<ShutdownController>,
    metrics: Arc<ServiceMetrics>,
    bridge: Arc<EventBridge>,
    supervisor: Supervisor,
    background: Mutex<Vec<JoinHandle<()>>>,
    genesis: Mutex<Option<Vec<u8>>>,
}

impl ZipService {
    pub fn new(config: ServiceConfig) -> Result<Arc<Self>, NodeError> {
        let metrics = Arc::new(ServiceMetrics::new()?);
        let shutdown = Arc::new(ShutdownController::new());
        let events = Arc::new(EventBus::new());
        let pool = Arc::new(NodePool::new(config.try_all_interval(), metrics.clone()));
        let caches = Arc::new(CacheSet::new(metrics.clone()));
        let tip = Arc::new(TipTracker::new(
            pool.clone(),
            caches.clone(),
            events.clone(),
            shutdown.clone(),
            metrics.clone(),
        ));
        let bridge = Arc::new(EventBridge::new(
            config.network,
            events.clone(),
            tip.clone(),
            shutdown.clone(),
            config.zmq_timing(),
            metrics.clone(),
        ));
        let supervisor = Supervisor::new(
            config.network,
            SupervisorTiming {
                spawn_restart_time: config.spawn_restart_time(),
                spawn_stop_time: config.spawn_stop_time(),
                shutdown_timeout: config.shutdown_timeout(),
            },
            shutdown.clone(),
            events.clone(),
            metrics.clone(),
        );

        Ok(Arc::new(Self {
            config,
            pool,
            caches,
            tip,
            events,
            shutdown,
            metrics,
            bridge,
            supervisor,
            background: Mutex::new(Vec::new()),
            genesis: Mutex::new(None),
        }))
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn shutdown_controller(&self) -> &Arc<ShutdownController> {
        &self.shutdown
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    /// Height of the tracked tip.
    pub fn height(&self) -> u64 {
        self.tip.height()
    }

    /// Serialized genesis block, loaded during start-up.
    pub fn genesis_buffer(&self) -> Option<Vec<u8>> {
        self.genesis.lock().ok().and_then(|g| g.clone())
    }

    pub async fn is_synced(&self) -> Result<bool, NodeError> {
        self.tip.is_synced().await
    }

    pub async fn sync_percentage(&self) -> Result<f64, NodeError> {
        self.tip.sync_percentage().await
    }

    /// Add a daemon connection to the fail-over pool without any start-up
    /// checks.
    pub fn add_node(&self, client: Arc<dyn DaemonRpc>, zmq_endpoint: Option<String>) -> Arc<NodeRecord> {
        let node = Arc::new(self.node_record(client, zmq_endpoint));
        self.pool.push(node.clone());
        node
    }

    fn node_record(&self, client: Arc<dyn DaemonRpc>, zmq_endpoint: Option<String>) -> NodeRecord {
        NodeRecord::new(
            client,
            self.config.reindex_wait(),
            self.config.tip_update_interval(),
        )
        .with_zmq_endpoint(zmq_endpoint)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Bring up the configured daemons and load the chain.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        self.config.validate()?;

        if let Some(spawn) = &self.config.spawn {
            self.spawn_node(spawn).await?;
        }
        try_join_all(self.config.connect.iter().map(|c| self.connect_node(c))).await?;

        self.init_chain().await
    }

    async fn spawn_node(self: &Arc<Self>, spawn: &SpawnConfig) -> Result<(), NodeError> {
        let network = self.network();
        let resolved = SpawnConfiguration::load(
            &spawn.datadir,
            &spawn.exec,
            self.config.config_path.as_deref(),
            network,
        )?;
        let respawns = self.supervisor.subscribe_respawns();
        self.supervisor.spawn(&resolved).await?;

        let client = HttpRpcClient::new(resolved.conf.rpc_endpoint(network))?;
        let node = Arc::new(self.node_record(Arc::new(client), resolved.conf.get_string("zmqpubrawtx")));
        node.set_reindex(resolved.reindex);
        self.bring_up(node.clone()).await?;
        self.follow_respawns(node, respawns);
        Ok(())
    }

    async fn connect_node(self: &Arc<Self>, connect: &ConnectConfig) -> Result<(), NodeError> {
        let client = HttpRpcClient::new(RpcEndpoint {
            protocol: connect.rpcprotocol.clone(),
            host: connect.rpchost.clone(),
            port: connect.rpcport,
            user: connect.rpcuser.clone(),
            password: connect.rpcpassword.clone(),
        })?;
        let node = self.node_record(Arc::new(client), connect.zmqpubrawtx.clone());
        self.bring_up(Arc::new(node)).await
    }

    /// Verify a daemon answers, wire its notifications and start watching
    /// its sync progress. Running it again for a node already in the pool
    /// rewires that node in place.
    pub async fn bring_up(self: &Arc<Self>, node: Arc<NodeRecord>) -> Result<(), NodeError> {
        verify_connection(
            &self.tip,
            &node,
            &self.shutdown,
            self.config.start_retry_interval(),
        )
        .await?;
        self.pool.push(node.clone());

        node.clear_event_subscription();
        self.bridge.init_zmq_socket(&node);
        self.tip.check_reindex(&node).await?;

        let tip = self.tip.clone();
        let watched = node.clone();
        node.set_sync_task(tokio::spawn(async move {
            if tip.check_synced(&watched).await {
                watched.request_event_subscription();
            }
        }));
        Ok(())
    }

    /// Bring `node` up again each time `respawns` ticks, i.e. after its
    /// daemon was relaunched.
    pub fn follow_respawns(self: &Arc<Self>, node: Arc<NodeRecord>, mut respawns: watch::Receiver<u64>) {
        let service = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = respawns.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                let Some(service) = service.upgrade() else {
                    return;
                };
                info!(respawns = *respawns.borrow(), "zipd relaunched, bringing it up again");
                if let Err(e) = service.bring_up(node.clone()).await {
                    error!(error = %e, "relaunched zipd did not come back");
                    service.events.emit(&ServiceEvent::Error(e.to_string()));
                }
            }
        });
        if let Ok(mut background) = self.background.lock() {
            background.push(handle);
        }
    }

    async fn init_chain(&self) -> Result<(), NodeError> {
        let best = self
            .pool
            .try_all(|c| async move { c.get_best_block_hash().await })
            .await?;
        let block = self
            .pool
            .try_all(|c| {
                let best = best.clone();
                async move { c.get_block_verbose(&best).await }
            })
            .await?;
        self.tip.record_tip(&best, block.header.height);

        let genesis_hash = self
            .pool
            .try_all(|c| async move { c.get_block_hash(0).await })
            .await?;
        let genesis = self.get_raw_block(BlockRef::Hash(genesis_hash)).await?;
        if let Ok(mut slot) = self.genesis.lock() {
            *slot = Some(genesis);
        }

        info!(height = block.header.height, hash = %best, "zip service ready");
        self.events.emit(&ServiceEvent::Ready);
        Ok(())
    }

    /// Stop background work and the spawned daemon, if any.
    pub async fn stop(&self) -> Result<(), NodeError> {
        self.shutdown.shutdown();
        if let Ok(mut background) = self.background.lock() {
            for handle in background.drain(..) {
                handle.abort();
            }
        }
        for node in self.pool.nodes() {
            node.abort_tasks();
        }
        self.supervisor.stop().await
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    pub fn publish_events(&self) -> Vec<PublishEvent> {
        crate::subscriptions::publish_events()
    }

    pub fn subscribe(&self, topic: Topic, subscriber: Subscriber) {
        self.bridge.subscribe(topic, subscriber);
    }

    pub fn unsubscribe(&self, topic: Topic, subscriber: &Subscriber) {
        self.bridge.unsubscribe(topic, subscriber);
    }

    pub fn subscribe_address(&self, subscriber: &Subscriber, addresses: &[String]) {
        self.bridge.subscribe_address(subscriber, addresses);
    }

    pub fn unsubscribe_address(&self, subscriber: &Subscriber, addresses: Option<&[String]>) {
        self.bridge.unsubscribe_address(subscriber, addresses);
    }

    /// Forget a subscriber entirely, e.g. when its connection closes.
    pub fn remove_subscriber(&self, subscriber: &Subscriber) {
        self.bridge.remove_subscriber(subscriber);
    }

    /// Feed one raw notification through the event bridge as if it came
    /// from `node`'s socket.
    pub fn handle_notification(&self, node: &Arc<NodeRecord>, topic: &[u8], body: &[u8]) {
        self.bridge.handle_message(node, topic, body);
    }
}
