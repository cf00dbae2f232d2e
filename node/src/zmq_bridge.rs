//! Bridges daemon ZMQ notifications to subscribers and the event bus.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use zeromq::{Socket, SocketRecv, SubSocket};
use zipcore_types::{Network, Transaction};

use crate::events::{EventBus, ServiceEvent};
use crate::known_set::{KnownSet, KNOWN_BLOCKS, KNOWN_TRANSACTIONS};
use crate::metrics::ServiceMetrics;
use crate::node_record::NodeRecord;
use crate::shutdown::ShutdownController;
use crate::subscriptions::{Published, Subscriber, SubscriptionRegistry, Topic, ADDRESS_TXID_EVENT};
use crate::tip::TipTracker;

const ZMQ_TOPICS: [&str; 3] = ["hashblock", "rawtx", "rawtxlock"];

/// Reconnect pacing for a notification socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZmqTiming {
    pub reconnect_delay: Duration,
    /// A socket that hears nothing for this long is reopened.
    pub idle_reconnect: Duration,
}

enum SocketExit {
    Stopped,
    Idle,
}

struct KnownSets {
    blocks: KnownSet,
    transactions: KnownSet,
    locks: KnownSet,
}

pub struct EventBridge {
    network: Network,
    registry: Mutex<SubscriptionRegistry>,
    known: Mutex<KnownSets>,
    events: Arc<EventBus>,
    tip: Arc<TipTracker>,
    shutdown: Arc<ShutdownController>,
    timing: ZmqTiming,
    metrics: Arc<ServiceMetrics>,
}

impl EventBridge {
    pub fn new(
        network: Network,
        events: Arc<EventBus>,
        tip: Arc<TipTracker>,
        shutdown: Arc<ShutdownController>,
        timing: ZmqTiming,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            network,
            registry: Mutex::new(SubscriptionRegistry::new()),
            known: Mutex::new(KnownSets {
                blocks: KnownSet::new(KNOWN_BLOCKS),
                transactions: KnownSet::new(KNOWN_TRANSACTIONS),
                locks: KnownSet::new(KNOWN_TRANSACTIONS),
            }),
            events,
            tip,
            shutdown,
            timing,
            metrics,
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    pub fn subscribe(&self, topic: Topic, subscriber: Subscriber) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.subscribe(topic, subscriber);
        }
    }

    pub fn unsubscribe(&self, topic: Topic, subscriber: &Subscriber) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.unsubscribe(topic, subscriber);
        }
    }

    pub fn subscribe_address(&self, subscriber: &Subscriber, addresses: &[String]) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.subscribe_address(subscriber, addresses, self.network);
        }
    }

    pub fn unsubscribe_address(&self, subscriber: &Subscriber, addresses: Option<&[String]>) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.unsubscribe_address(subscriber, addresses);
        }
    }

    pub fn remove_subscriber(&self, subscriber: &Subscriber) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(subscriber);
        }
    }

    fn topic_subscribers(&self, topic: Topic) -> Vec<Subscriber> {
        self.registry
            .lock()
            .map(|r| r.topic_subscribers(topic))
            .unwrap_or_default()
    }

    fn address_subscribers(&self, address: &str) -> Vec<Subscriber> {
        self.registry
            .lock()
            .map(|r| r.address_subscribers(address))
            .unwrap_or_default()
    }

    // ── Notifications ───────────────────────────────────────────────────

    /// Dispatch one notification by its ZMQ topic. Unknown topics are
    /// ignored.
    pub fn handle_message(&self, node: &Arc<NodeRecord>, topic: &[u8], body: &[u8]) {
        let topic = String::from_utf8_lossy(topic);
        self.metrics
            .zmq_notifications
            .with_label_values(&[topic.as_ref()])
            .inc();
        match topic.as_ref() {
            "hashblock" => self.handle_hash_block(node, body),
            "rawtx" => self.handle_raw_transaction(Topic::RawTransaction, body),
            "rawtxlock" => self.handle_raw_transaction(Topic::TransactionLock, body),
            other => debug!(topic = other, "ignoring unknown zmq topic"),
        }
    }

    fn first_sighting(&self, topic: Topic, hex: &str) -> bool {
        let fresh = match self.known.lock() {
            Ok(mut known) => match topic {
                Topic::HashBlock => known.blocks.insert(hex),
                Topic::RawTransaction => known.transactions.insert(hex),
                Topic::TransactionLock => known.locks.insert(hex),
            },
            Err(_) => false,
        };
        if !fresh {
            self.metrics
                .zmq_duplicates
                .with_label_values(&[topic.event_name()])
                .inc();
        }
        fresh
    }

    fn publish(&self, topic: Topic, hex: &str) {
        for subscriber in self.topic_subscribers(topic) {
            subscriber.send(Published {
                event: topic.event_name(),
                data: json!(hex),
            });
        }
    }

    fn handle_hash_block(&self, node: &Arc<NodeRecord>, body: &[u8]) {
        let hash = hex::encode(body);
        if !self.first_sighting(Topic::HashBlock, &hash) {
            return;
        }
        self.tip.rapid_protected_update_tip(Arc::clone(node), hash.clone());
        self.publish(Topic::HashBlock, &hash);
        self.events.emit(&ServiceEvent::Block(body.to_vec()));
    }

    fn handle_raw_transaction(&self, topic: Topic, body: &[u8]) {
        let hex = hex::encode(body);
        if !self.first_sighting(topic, &hex) {
            return;
        }
        self.publish(topic, &hex);
        let event = match topic {
            Topic::TransactionLock => ServiceEvent::TxLock(body.to_vec()),
            _ => ServiceEvent::Tx(body.to_vec()),
        };
        self.events.emit(&event);
        self.notify_addresses(body);
    }

    fn notify_addresses(&self, body: &[u8]) {
        let tx = match Transaction::decode(body) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(error = %e, "skipping address notifications for undecodable tx");
                return;
            }
        };
        let txid = tx.txid();
        for address in tx.addresses(self.network) {
            let address = address.to_string();
            for subscriber in self.address_subscribers(&address) {
                subscriber.send(Published {
                    event: ADDRESS_TXID_EVENT,
                    data: json!({ "address": address, "txid": txid }),
                });
            }
        }
    }

    // ── Socket ──────────────────────────────────────────────────────────

    /// Keep a SUB socket on the node's notification endpoint feeding the
    /// bridge until shutdown. Topics are subscribed once the node reports
    /// it is synced. Calling this again replaces the node's socket task.
    pub fn init_zmq_socket(self: &Arc<Self>, node: &Arc<NodeRecord>) {
        let Some(endpoint) = node.zmq_endpoint.clone() else {
            warn!("node has no zmqpubrawtx endpoint, notifications disabled");
            return;
        };
        let bridge = Arc::clone(self);
        let record = Arc::clone(node);
        let handle = tokio::spawn(async move {
            bridge.run_socket(&record, &endpoint).await;
        });
        node.set_event_task(handle);
    }

    async fn run_socket(&self, node: &Arc<NodeRecord>, endpoint: &str) {
        loop {
            match self.listen(node, endpoint).await {
                Ok(SocketExit::Stopped) => return,
                Ok(SocketExit::Idle) => info!(
                    endpoint,
                    idle_ms = self.timing.idle_reconnect.as_millis() as u64,
                    "no zmq traffic, reopening socket"
                ),
                Err(e) => {
                    warn!(endpoint, error = %e, "zmq socket failed, reopening");
                    self.events.emit(&ServiceEvent::Error(e.to_string()));
                }
            }
            self.metrics.zmq_reconnects.inc();
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.timing.reconnect_delay) => {}
            }
        }
    }

    /// One socket lifetime. zeromq's SUB socket never reports a vanished
    /// publisher, so a silent socket is treated as dead.
    async fn listen(&self, node: &Arc<NodeRecord>, endpoint: &str) -> Result<SocketExit, zeromq::ZmqError> {
        let mut socket = SubSocket::new();
        tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(SocketExit::Stopped),
            connected = socket.connect(endpoint) => connected?,
        }
        info!(endpoint, "zmq socket connected");

        tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(SocketExit::Stopped),
            _ = node.event_subscription_requested() => {}
        }
        for topic in ZMQ_TOPICS {
            socket.subscribe(topic).await?;
        }
        info!(endpoint, "subscribed to zmq topics");

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(SocketExit::Stopped),
                received = tokio::time::timeout(self.timing.idle_reconnect, socket.recv()) => received,
            };
            let Ok(message) = received else {
                return Ok(SocketExit::Idle);
            };
            let message = message?;
            // topic, body, sequence
            match (message.get(0), message.get(1)) {
                (Some(topic), Some(body)) => self.handle_message(node, topic, body),
                _ => debug!(frames = message.len(), "ignoring short zmq message"),
            }
        }
    }
}
