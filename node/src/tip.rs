//! Chain tip tracking: height, sync progress, reindex and the debounce
//! that collapses bursts of new-block signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use zipcore_rpc::DaemonRpc;

use crate::cache::CacheSet;
use crate::events::{EventBus, ServiceEvent};
use crate::metrics::ServiceMetrics;
use crate::node_record::NodeRecord;
use crate::pool::NodePool;
use crate::shutdown::ShutdownController;
use crate::NodeError;

/// Sync percentage from which the service counts as synced.
pub const SYNCED_PERCENTAGE: f64 = 99.5;

/// Verification progress from which a node's topics get subscribed.
pub const SUBSCRIBE_PROGRESS: f64 = 0.9999;

/// Window in which repeated tip signals are coalesced.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Lifecycle of the tracked tip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TipPhase {
    /// No daemon has reported a tip yet.
    #[default]
    Uninitialized,
    /// A start-up tip was read while the service is still coming up.
    Initializing,
    /// New blocks are followed through `update_tip`.
    Tracking,
}

#[derive(Default)]
struct TipState {
    phase: TipPhase,
    height: u64,
    last_hash: Option<String>,
}

#[derive(Default)]
struct Debounce {
    window_open: bool,
    pending: Option<(Arc<NodeRecord>, String)>,
}

pub struct TipTracker {
    state: Mutex<TipState>,
    debounce: Mutex<Debounce>,
    synced: AtomicBool,
    pool: Arc<NodePool>,
    caches: Arc<CacheSet>,
    events: Arc<EventBus>,
    shutdown: Arc<ShutdownController>,
    metrics: Arc<ServiceMetrics>,
}

impl TipTracker {
    pub fn new(
        pool: Arc<NodePool>,
        caches: Arc<CacheSet>,
        events: Arc<EventBus>,
        shutdown: Arc<ShutdownController>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(TipState::default()),
            debounce: Mutex::new(Debounce::default()),
            synced: AtomicBool::new(false),
            pool,
            caches,
            events,
            shutdown,
            metrics,
        }
    }

    pub fn height(&self) -> u64 {
        self.state.lock().map(|s| s.height).unwrap_or(0)
    }

    pub fn last_hash(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.last_hash.clone())
    }

    /// Whether a `Synced` event has been emitted.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> TipPhase {
        self.state.lock().map(|s| s.phase).unwrap_or_default()
    }

    /// Adopt a tip read during start-up without emitting an event. Once
    /// the tracker follows new blocks the start-up read is stale and is
    /// dropped.
    pub(crate) fn record_tip(&self, hash: &str, height: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.phase == TipPhase::Tracking {
            debug!(height, current = state.height, "tip already tracked, keeping it");
            return;
        }
        state.phase = TipPhase::Initializing;
        state.height = height;
        state.last_hash = Some(hash.to_string());
        self.metrics.tip_height.set(height as i64);
    }

    /// `verificationprogress` of any reachable node, as a percentage.
    pub async fn sync_percentage(&self) -> Result<f64, NodeError> {
        let info = self
            .pool
            .try_all(|c| async move { c.get_blockchain_info().await })
            .await?;
        Ok(info.verificationprogress * 100.0)
    }

    pub async fn is_synced(&self) -> Result<bool, NodeError> {
        Ok(self.sync_percentage().await? >= SYNCED_PERCENTAGE)
    }

    /// Read the best block of `node` and adopt its height.
    pub async fn load_tip_from_node(&self, node: &NodeRecord) -> Result<(), NodeError> {
        let result = async {
            let hash = node.client.get_best_block_hash().await?;
            let block = node.client.get_block_verbose(&hash).await?;
            Ok::<_, NodeError>(block.header.height)
        }
        .await;

        match result {
            Ok(height) => {
                if let Ok(mut state) = self.state.lock() {
                    if state.phase == TipPhase::Uninitialized {
                        state.phase = TipPhase::Initializing;
                    }
                    state.height = height;
                }
                self.metrics.tip_height.set(height as i64);
                self.events.emit(&ServiceEvent::Tip(height));
                Ok(())
            }
            Err(e) => {
                if e.rpc_code() == Some(zipcore_rpc::error::RPC_IN_WARMUP) {
                    warn!(error = %e, "zipd is still warming up");
                }
                Err(e)
            }
        }
    }

    /// Adopt `hash` as the new tip, as reported by `node`. A result that
    /// arrives after a newer hash was claimed is discarded.
    pub async fn update_tip(&self, node: &NodeRecord, hash: &str) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.last_hash.as_deref() == Some(hash) {
                return;
            }
            state.last_hash = Some(hash.to_string());
        }

        let block = match node.client.get_block_verbose(hash).await {
            Ok(block) => block,
            Err(e) => {
                error!(hash, error = %e, "failed to fetch new tip block");
                self.events.emit(&ServiceEvent::Error(e.to_string()));
                return;
            }
        };

        let height = block.header.height;
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.last_hash.as_deref() != Some(hash) {
                debug!(hash, height, "tip superseded while fetching, discarding");
                return;
            }
            state.phase = TipPhase::Tracking;
            state.height = height;
        }
        self.caches.reset();
        self.metrics.tip_height.set(height as i64);
        self.events.emit(&ServiceEvent::Tip(height));

        if self.shutdown.is_stopping() || self.has_synced() {
            return;
        }
        match self.sync_percentage().await {
            Ok(percentage) if percentage >= SYNCED_PERCENTAGE => {
                if !self.synced.swap(true, Ordering::SeqCst) {
                    info!(height, "zipd is fully synced");
                    self.events.emit(&ServiceEvent::Synced);
                }
            }
            Ok(percentage) => {
                info!(
                    height,
                    percentage = format!("{percentage:.2}"),
                    "zipd sync in progress"
                );
            }
            Err(e) => {
                error!(error = %e, "failed to read sync percentage");
                self.events.emit(&ServiceEvent::Error(e.to_string()));
            }
        }
    }

    /// Debounced [`TipTracker::update_tip`]: the first signal runs at once,
    /// later ones inside the window collapse into one trailing update with
    /// the latest hash.
    pub fn rapid_protected_update_tip(self: &Arc<Self>, node: Arc<NodeRecord>, hash: String) {
        {
            let Ok(mut debounce) = self.debounce.lock() else {
                return;
            };
            if debounce.window_open {
                debounce.pending = Some((node, hash));
                return;
            }
            debounce.window_open = true;
        }

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.update_tip(&node, &hash).await;
        });

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            let pending = match tracker.debounce.lock() {
                Ok(mut debounce) => {
                    debounce.window_open = false;
                    debounce.pending.take()
                }
                Err(_) => None,
            };
            if let Some((node, hash)) = pending {
                tracker.update_tip(&node, &hash).await;
            }
        });
    }

    /// Wait out a reindex the daemon was started with.
    pub async fn check_reindex(&self, node: &NodeRecord) -> Result<(), NodeError> {
        while node.is_reindexing() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(node.reindex_wait) => {}
            }
            let info = node.client.get_blockchain_info().await?;
            let percentage = info.verificationprogress * 100.0;
            info!(percentage = format!("{percentage:.2}"), "zipd reindex in progress");
            if info.verificationprogress >= 1.0 {
                node.set_reindex(false);
            }
        }
        Ok(())
    }

    /// Poll `node` until it is nearly synced, tracking the tip on the way.
    /// Returns `true` once the node's event topics should be subscribed,
    /// `false` if shutdown interrupted the wait.
    pub async fn check_synced(&self, node: &NodeRecord) -> bool {
        loop {
            if self.shutdown.is_stopping() {
                return false;
            }

            match node.client.get_best_block_hash().await {
                Ok(hash) => {
                    if let Ok(bytes) = hex::decode(&hash) {
                        self.events.emit(&ServiceEvent::Block(bytes));
                    }
                    self.update_tip(node, &hash).await;
                }
                Err(e) => error!(error = %e, "failed to poll best block hash"),
            }

            match node.client.get_blockchain_info().await {
                Ok(info) if info.verificationprogress >= SUBSCRIBE_PROGRESS => return true,
                Ok(_) => {}
                Err(e) => error!(error = %e, "failed to poll blockchain info"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(node.tip_update_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use zipcore_nullables::NullRpc;
    use zipcore_rpc::RpcError;

    /// Serves `getblock` with the height encoded in the hash, holding back
    /// one hash for `delay`.
    struct SlowBlockRpc {
        slow_hash: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl DaemonRpc for SlowBlockRpc {
        async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
            if method != "getblock" {
                return Err(RpcError::daemon(-32601, "Method not found"));
            }
            let hash = params
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if hash == self.slow_hash {
                tokio::time::sleep(self.delay).await;
            }
            let height: u64 = hash.parse().unwrap_or_default();
            Ok(json!({ "hash": hash, "height": height, "tx": [] }))
        }
    }

    struct Harness {
        tracker: Arc<TipTracker>,
        node: Arc<NodeRecord>,
        rpc: Arc<NullRpc>,
        caches: Arc<CacheSet>,
        shutdown: Arc<ShutdownController>,
        events: Arc<std::sync::Mutex<Vec<ServiceEvent>>>,
    }

    fn harness() -> Harness {
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let rpc = Arc::new(NullRpc::new());
        let node = Arc::new(NodeRecord::new(
            rpc.clone(),
            Duration::from_millis(10000),
            Duration::from_millis(15000),
        ));
        let pool = Arc::new(NodePool::new(Duration::from_millis(1000), metrics.clone()));
        pool.push(node.clone());
        let caches = Arc::new(CacheSet::new(metrics.clone()));
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.subscribe(Box::new(move |e| sink.lock().unwrap().push(e.clone())));
        let shutdown = Arc::new(ShutdownController::new());
        let tracker = Arc::new(TipTracker::new(
            pool,
            caches.clone(),
            bus,
            shutdown.clone(),
            metrics,
        ));
        Harness {
            tracker,
            node,
            rpc,
            caches,
            shutdown,
            events,
        }
    }

    fn block(height: u64) -> serde_json::Value {
        json!({ "hash": "00ab", "height": height, "tx": [] })
    }

    #[tokio::test]
    async fn sync_percentage_accepts_string_progress() {
        let h = harness();
        h.rpc
            .set_result("getblockchaininfo", json!({ "verificationprogress": "0.983821387" }));
        let pct = h.tracker.sync_percentage().await.unwrap();
        assert!((pct - 98.3821387).abs() < 1e-9);
        assert!(!h.tracker.is_synced().await.unwrap());
    }

    #[tokio::test]
    async fn update_tip_sets_height_and_flushes_state_caches() {
        let h = harness();
        h.rpc.set_result("getblock", block(10));
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }));
        h.caches.txids.put("addr", vec![]);
        h.caches.raw_block.put("b", vec![1]);

        h.tracker.update_tip(&h.node, "00ab").await;

        assert_eq!(h.tracker.height(), 10);
        assert!(h.caches.txids.is_empty());
        assert!(h.caches.raw_block.contains("b"));
        assert_eq!(h.events.lock().unwrap().as_slice(), &[ServiceEvent::Tip(10)]);
    }

    #[tokio::test]
    async fn update_tip_ignores_repeated_hash() {
        let h = harness();
        h.rpc.set_result("getblock", block(10));
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }));
        h.tracker.update_tip(&h.node, "00ab").await;
        h.tracker.update_tip(&h.node, "00ab").await;
        assert_eq!(h.rpc.call_count("getblock"), 1);
    }

    #[tokio::test]
    async fn update_tip_emits_error_on_rpc_failure() {
        let h = harness();
        h.rpc.set_error("getblock", -1, "Test error");
        h.tracker.update_tip(&h.node, "00ab").await;
        assert_eq!(h.tracker.height(), 0);
        assert_eq!(
            h.events.lock().unwrap().as_slice(),
            &[ServiceEvent::Error("Test error".into())]
        );
    }

    #[tokio::test]
    async fn update_tip_emits_synced_once() {
        let h = harness();
        h.rpc.set_handler("getblock", |params| {
            Ok(json!({ "hash": params[0], "height": 100, "tx": [] }))
        });
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.999 }));
        h.tracker.update_tip(&h.node, "01").await;
        h.tracker.update_tip(&h.node, "02").await;
        let synced = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == ServiceEvent::Synced)
            .count();
        assert_eq!(synced, 1);
        assert!(h.tracker.has_synced());
        assert_eq!(h.rpc.call_count("getblockchaininfo"), 1);
    }

    #[tokio::test]
    async fn update_tip_skips_sync_check_while_stopping() {
        let h = harness();
        h.rpc.set_result("getblock", block(5));
        h.shutdown.shutdown();
        h.tracker.update_tip(&h.node, "00ab").await;
        assert_eq!(h.rpc.call_count("getblockchaininfo"), 0);
        assert_eq!(h.tracker.height(), 5);
    }

    #[tokio::test]
    async fn update_tip_reports_sync_percentage_error() {
        let h = harness();
        h.rpc.set_result("getblock", block(5));
        h.rpc.set_error("getblockchaininfo", -1, "no info");
        h.tracker.update_tip(&h.node, "00ab").await;
        assert!(h
            .events
            .lock()
            .unwrap()
            .contains(&ServiceEvent::Error("no info".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_updates_are_debounced() {
        let h = harness();
        let fetched = Arc::new(AtomicUsize::new(0));
        let counter = fetched.clone();
        h.rpc.set_handler("getblock", move |params| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "hash": params[0], "height": 1, "tx": [] }))
        });
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.1 }));

        for i in 0..50 {
            h.tracker
                .rapid_protected_update_tip(h.node.clone(), format!("{i:064x}"));
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let n = fetched.load(Ordering::SeqCst);
        assert!((1..=2).contains(&n), "expected 1 or 2 updates, got {n}");
        assert_eq!(h.tracker.last_hash(), Some(format!("{:064x}", 49)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_leading_update_cannot_roll_tip_back() {
        let h = harness();
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.1 }));
        let slow = Arc::new(SlowBlockRpc {
            slow_hash: "0100",
            delay: Duration::from_millis(1500),
        });
        let node = Arc::new(NodeRecord::new(
            slow,
            Duration::from_millis(10000),
            Duration::from_millis(15000),
        ));

        h.tracker.rapid_protected_update_tip(node.clone(), "0100".into());
        h.tracker.rapid_protected_update_tip(node.clone(), "0101".into());
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(h.tracker.height(), 101);
        assert_eq!(h.tracker.last_hash().as_deref(), Some("0101"));
        let tips: Vec<u64> = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ServiceEvent::Tip(height) => Some(*height),
                _ => None,
            })
            .collect();
        assert_eq!(tips, vec![101]);
    }

    #[tokio::test]
    async fn record_tip_adopts_silently_before_tracking() {
        let h = harness();
        assert_eq!(h.tracker.phase(), TipPhase::Uninitialized);
        h.tracker.record_tip("00ab", 7);
        assert_eq!(h.tracker.phase(), TipPhase::Initializing);
        assert_eq!(h.tracker.height(), 7);
        assert!(h.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_tip_keeps_tracked_tip() {
        let h = harness();
        h.rpc.set_result("getblock", block(10));
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }));
        h.tracker.update_tip(&h.node, "00ab").await;
        assert_eq!(h.tracker.phase(), TipPhase::Tracking);

        h.tracker.record_tip("00cd", 9);

        assert_eq!(h.tracker.height(), 10);
        assert_eq!(h.tracker.last_hash().as_deref(), Some("00ab"));
    }

    #[tokio::test]
    async fn load_tip_from_node_sets_height() {
        let h = harness();
        h.rpc.set_result("getbestblockhash", json!("00ab"));
        h.rpc.set_result("getblock", block(828781));
        h.tracker.load_tip_from_node(&h.node).await.unwrap();
        assert_eq!(h.tracker.height(), 828781);
        assert_eq!(h.tracker.phase(), TipPhase::Initializing);
    }

    #[tokio::test]
    async fn load_tip_from_node_returns_warmup_error() {
        let h = harness();
        h.rpc.set_error("getbestblockhash", -28, "Verifying blocks...");
        let err = h.tracker.load_tip_from_node(&h.node).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(-28));
    }

    #[tokio::test(start_paused = true)]
    async fn check_reindex_polls_until_complete() {
        let h = harness();
        h.node.set_reindex(true);
        h.rpc
            .push_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }))
            .push_result("getblockchaininfo", json!({ "verificationprogress": 1 }));
        h.tracker.check_reindex(&h.node).await.unwrap();
        assert!(!h.node.is_reindexing());
        assert_eq!(h.rpc.call_count("getblockchaininfo"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn check_reindex_returns_rpc_error() {
        let h = harness();
        h.node.set_reindex(true);
        h.rpc.set_error("getblockchaininfo", -1, "Test error");
        assert!(h.tracker.check_reindex(&h.node).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn check_reindex_stops_on_shutdown() {
        let h = harness();
        h.node.set_reindex(true);
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }));
        let tracker = h.tracker.clone();
        let node = h.node.clone();
        let task = tokio::spawn(async move { tracker.check_reindex(&node).await });

        tokio::time::sleep(Duration::from_millis(15000)).await;
        assert_eq!(h.rpc.call_count("getblockchaininfo"), 1);
        h.shutdown.shutdown();

        assert!(task.await.unwrap().is_ok());
        tokio::time::sleep(Duration::from_millis(30000)).await;
        assert_eq!(h.rpc.call_count("getblockchaininfo"), 1);
        assert!(h.node.is_reindexing());
    }

    #[tokio::test]
    async fn check_reindex_skips_when_not_reindexing() {
        let h = harness();
        h.tracker.check_reindex(&h.node).await.unwrap();
        assert_eq!(h.rpc.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_synced_polls_once_when_already_synced() {
        let h = harness();
        h.rpc.set_result("getbestblockhash", json!("00ab"));
        h.rpc.set_result("getblock", block(3));
        h.rpc.set_result("getblockchaininfo", json!({ "verificationprogress": 1 }));
        assert!(h.tracker.check_synced(&h.node).await);
        assert_eq!(h.rpc.call_count("getbestblockhash"), 1);
        assert!(h
            .events
            .lock()
            .unwrap()
            .contains(&ServiceEvent::Block(vec![0x00, 0xab])));
    }

    #[tokio::test(start_paused = true)]
    async fn check_synced_keeps_polling_until_progress() {
        let h = harness();
        h.rpc.set_result("getbestblockhash", json!("00ab"));
        h.rpc.set_result("getblock", block(3));
        h.rpc
            .push_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }))
            .push_result("getblockchaininfo", json!({ "verificationprogress": 0.5 }))
            .set_result("getblockchaininfo", json!({ "verificationprogress": 0.99999 }));
        assert!(h.tracker.check_synced(&h.node).await);
        assert_eq!(h.rpc.call_count("getbestblockhash"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn check_synced_stops_on_shutdown() {
        let h = harness();
        h.rpc.set_error("getbestblockhash", -1, "down");
        h.rpc.set_error("getblockchaininfo", -1, "down");
        let tracker = h.tracker.clone();
        let node = h.node.clone();
        let task = tokio::spawn(async move { tracker.check_synced(&node).await });
        tokio::time::sleep(Duration::from_millis(20000)).await;
        h.shutdown.shutdown();
        assert!(!task.await.unwrap());
    }
}
