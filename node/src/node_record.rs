//! One daemon connection and its per-node sync state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use zipcore_rpc::DaemonRpc;

pub struct NodeRecord {
    pub client: Arc<dyn DaemonRpc>,
    /// ZMQ endpoint the daemon publishes notifications on.
    pub zmq_endpoint: Option<String>,
    pub reindex_wait: Duration,
    pub tip_update_interval: Duration,
    reindex: AtomicBool,
    events_requested: AtomicBool,
    event_task: Mutex<Option<JoinHandle<()>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    subscribe_events: Notify,
}

impl NodeRecord {
    pub fn new(client: Arc<dyn DaemonRpc>, reindex_wait: Duration, tip_update_interval: Duration) -> Self {
        Self {
            client,
            zmq_endpoint: None,
            reindex_wait,
            tip_update_interval,
            reindex: AtomicBool::new(false),
            events_requested: AtomicBool::new(false),
            event_task: Mutex::new(None),
            sync_task: Mutex::new(None),
            subscribe_events: Notify::new(),
        }
    }

    /// Tell the event socket task to start its topic subscriptions. The
    /// request sticks, so every later socket subscribes straight away.
    pub fn request_event_subscription(&self) {
        self.events_requested.store(true, Ordering::SeqCst);
        self.subscribe_events.notify_waiters();
    }

    /// Forget an earlier request, e.g. after the daemon restarted and has
    /// to prove it is synced again.
    pub fn clear_event_subscription(&self) {
        self.events_requested.store(false, Ordering::SeqCst);
    }

    pub async fn event_subscription_requested(&self) {
        loop {
            let notified = self.subscribe_events.notified();
            if self.events_requested.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn with_zmq_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.zmq_endpoint = endpoint;
        self
    }

    /// Whether the daemon was started with `reindex=1` and has not caught up.
    pub fn is_reindexing(&self) -> bool {
        self.reindex.load(Ordering::SeqCst)
    }

    pub fn set_reindex(&self, reindex: bool) {
        self.reindex.store(reindex, Ordering::SeqCst);
    }

    /// Attach the task reading this node's event socket, replacing any
    /// previous one.
    pub fn set_event_task(&self, handle: JoinHandle<()>) {
        replace_task(&self.event_task, handle);
    }

    /// Attach the task polling this node's sync progress, replacing any
    /// previous one.
    pub fn set_sync_task(&self, handle: JoinHandle<()>) {
        replace_task(&self.sync_task, handle);
    }

    pub fn has_event_task(&self) -> bool {
        self.event_task
            .lock()
            .map(|task| task.is_some())
            .unwrap_or(false)
    }

    pub fn abort_tasks(&self) {
        for slot in [&self.event_task, &self.sync_task] {
            if let Ok(mut task) = slot.lock() {
                if let Some(handle) = task.take() {
                    handle.abort();
                }
            }
        }
    }
}

fn replace_task(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Ok(mut task) = slot.lock() {
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for NodeRecord {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipcore_nullables::NullRpc;

    fn node() -> NodeRecord {
        NodeRecord::new(
            Arc::new(NullRpc::new()),
            Duration::from_secs(10),
            Duration::from_secs(15),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_subscription_waits_for_a_new_request() {
        let node = Arc::new(node());
        node.request_event_subscription();
        node.clear_event_subscription();

        let waiter = node.clone();
        let task = tokio::spawn(async move { waiter.event_subscription_requested().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        node.request_event_subscription();
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn replaced_task_is_aborted() {
        let node = node();
        let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
        node.set_sync_task(tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        }));
        node.set_sync_task(tokio::spawn(async {}));
        assert!(dropped.await.is_err());
        node.abort_tasks();
    }
}
