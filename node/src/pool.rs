//! Round-robin fail-over across daemon connections.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, warn};
use zipcore_rpc::DaemonRpc;

use crate::metrics::ServiceMetrics;
use crate::node_record::NodeRecord;
use crate::NodeError;

/// Ordered daemon connections plus the rotation cursor.
///
/// Each [`NodePool::try_all`] call advances the cursor exactly once, then
/// walks the nodes from the old cursor position until one succeeds.
pub struct NodePool {
    nodes: RwLock<Vec<Arc<NodeRecord>>>,
    cursor: Mutex<usize>,
    try_all_interval: Duration,
    metrics: Arc<ServiceMetrics>,
}

impl NodePool {
    pub fn new(try_all_interval: Duration, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            cursor: Mutex::new(0),
            try_all_interval,
            metrics,
        }
    }

    /// Append `node`. A node already in the pool is left where it is.
    pub fn push(&self, node: Arc<NodeRecord>) {
        if let Ok(mut nodes) = self.nodes.write() {
            if !nodes.iter().any(|n| Arc::ptr_eq(n, &node)) {
                nodes.push(node);
            }
        }
    }

    pub fn nodes(&self) -> Vec<Arc<NodeRecord>> {
        self.nodes.read().map(|n| n.clone()).unwrap_or_default()
    }

    /// Drop every node, aborting their background tasks.
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .nodes
            .write()
            .map(|mut n| n.drain(..).collect())
            .unwrap_or_default();
        for node in drained {
            node.abort_tasks();
        }
        self.set_cursor(0);
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|n| n.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cursor(&self) -> usize {
        self.cursor.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn set_cursor(&self, value: usize) {
        if let Ok(mut cursor) = self.cursor.lock() {
            *cursor = value;
        }
    }

    /// Advance the cursor and return the position it held before.
    fn rotate(&self, len: usize) -> usize {
        match self.cursor.lock() {
            Ok(mut cursor) => {
                let start = *cursor % len;
                *cursor = (start + 1) % len;
                start
            }
            Err(_) => 0,
        }
    }

    /// Run `op` against each node in rotation order until one succeeds,
    /// pausing `try_all_interval` between attempts. Returns the last error
    /// when every node fails.
    pub async fn try_all<T, E, F, Fut>(&self, op: F) -> Result<T, NodeError>
    where
        F: Fn(Arc<dyn DaemonRpc>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<NodeError>,
    {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return Err(NodeError::NoDaemon);
        }
        let len = nodes.len();
        let start = self.rotate(len);

        let mut last_error = NodeError::NoDaemon;
        for attempt in 0..len {
            let index = (start + attempt) % len;
            match op(nodes[index].client.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let e: NodeError = e.into();
                    debug!(node = index, attempt, error = %e, "daemon call failed");
                    last_error = e;
                }
            }
            if attempt + 1 < len {
                self.metrics.rpc_failovers.inc();
                warn!(node = index, "retrying daemon call on next node");
                tokio::time::sleep(self.try_all_interval).await;
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zipcore_nullables::NullRpc;
    use zipcore_rpc::RpcError;

    fn pool_of(rpcs: Vec<Arc<NullRpc>>) -> NodePool {
        let pool = NodePool::new(
            Duration::from_millis(1000),
            Arc::new(ServiceMetrics::new().unwrap()),
        );
        for rpc in rpcs {
            pool.push(Arc::new(NodeRecord::new(
                rpc,
                Duration::from_secs(10),
                Duration::from_secs(15),
            )));
        }
        pool
    }

    fn failing(code: i64) -> Arc<NullRpc> {
        let rpc = Arc::new(NullRpc::new());
        rpc.set_error("getbestblockhash", code, &format!("error {code}"));
        rpc
    }

    #[test]
    fn pushing_a_node_twice_keeps_one_entry() {
        let pool = pool_of(vec![Arc::new(NullRpc::new())]);
        let node = pool.nodes()[0].clone();
        pool.push(node);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn empty_pool_has_no_daemon() {
        let pool = pool_of(vec![]);
        let res = pool.try_all(|c| async move { c.get_best_block_hash().await }).await;
        assert!(matches!(res, Err(NodeError::NoDaemon)));
    }

    #[tokio::test(start_paused = true)]
    async fn last_error_is_returned_and_cursor_advances_once() {
        // nodes[2] fails with 1, nodes[0] with 2, nodes[1] with 3
        let pool = pool_of(vec![failing(2), failing(3), failing(1)]);
        pool.set_cursor(2);
        let err = pool
            .try_all(|c| async move { c.get_best_block_hash().await })
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(3));
        assert_eq!(pool.cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let ok = Arc::new(NullRpc::new());
        ok.set_result("getbestblockhash", json!("00ab"));
        let untouched = Arc::new(NullRpc::new());
        let first = failing(-1);
        let pool = pool_of(vec![first.clone(), ok.clone(), untouched.clone()]);

        let hash = pool
            .try_all(|c| async move { c.get_best_block_hash().await })
            .await
            .unwrap();
        assert_eq!(hash, "00ab");
        assert_eq!(first.total_calls(), 1);
        assert_eq!(ok.total_calls(), 1);
        assert_eq!(untouched.total_calls(), 0);
        assert_eq!(pool.cursor(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_spreads_calls() {
        let a = Arc::new(NullRpc::new());
        let b = Arc::new(NullRpc::new());
        a.set_result("getbestblockhash", json!("a"));
        b.set_result("getbestblockhash", json!("b"));
        let pool = pool_of(vec![a, b]);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(
                pool.try_all(|c| async move { c.get_best_block_hash().await })
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(seen, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let pool = pool_of(vec![failing(-1), failing(-2)]);
        let started = tokio::time::Instant::now();
        let _ = pool
            .try_all(|c| async move { c.get_best_block_hash().await })
            .await;
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn op_error_type_converts() {
        let pool = pool_of(vec![failing(-8)]);
        let res: Result<(), NodeError> = pool
            .try_all(|_c| async move { Err::<(), _>(RpcError::Transport("down".into())) })
            .await;
        assert!(matches!(res, Err(NodeError::Rpc(RpcError::Transport(_)))));
    }
}
