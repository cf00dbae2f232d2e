//! Subscribers and the topic/address registry the event bridge fans out to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use zipcore_types::{Address, Network};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// The three topic channels a subscriber can join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    RawTransaction,
    TransactionLock,
    HashBlock,
}

impl Topic {
    pub fn event_name(&self) -> &'static str {
        match self {
            Topic::RawTransaction => "zipd/rawtransaction",
            Topic::TransactionLock => "zipd/transactionlock",
            Topic::HashBlock => "zipd/hashblock",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "zipd/rawtransaction" => Some(Topic::RawTransaction),
            "zipd/transactionlock" => Some(Topic::TransactionLock),
            "zipd/hashblock" => Some(Topic::HashBlock),
            _ => None,
        }
    }
}

/// Name of the per-address publish event.
pub const ADDRESS_TXID_EVENT: &str = "zipd/addresstxid";

/// One message delivered to a subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Published {
    pub event: &'static str,
    pub data: Value,
}

/// Describes one event the service publishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublishEvent {
    pub name: &'static str,
    /// `None` for the address-scoped event.
    #[serde(skip)]
    pub topic: Option<Topic>,
    pub description: &'static str,
}

/// The publish events in the order they are advertised.
pub fn publish_events() -> Vec<PublishEvent> {
    vec![
        PublishEvent {
            name: Topic::RawTransaction.event_name(),
            topic: Some(Topic::RawTransaction),
            description: "hex of every new mempool transaction",
        },
        PublishEvent {
            name: Topic::TransactionLock.event_name(),
            topic: Some(Topic::TransactionLock),
            description: "hex of every instant-locked transaction",
        },
        PublishEvent {
            name: Topic::HashBlock.event_name(),
            topic: Some(Topic::HashBlock),
            description: "hash of every new block",
        },
        PublishEvent {
            name: ADDRESS_TXID_EVENT,
            topic: None,
            description: "{address, txid} for transactions touching subscribed addresses",
        },
    ]
}

/// A channel handle with an identity. Clones share the identity.
#[derive(Clone, Debug)]
pub struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Published>,
}

impl Subscriber {
    pub fn new(tx: mpsc::UnboundedSender<Published>) -> Self {
        Self {
            id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// A new subscriber and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deliver a message. Returns `false` once the receiver is gone.
    pub fn send(&self, message: Published) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

/// Subscribers per topic and per address. No key ever holds a subscriber
/// twice, and address lists are removed as soon as they empty.
#[derive(Default)]
pub struct SubscriptionRegistry {
    by_topic: HashMap<Topic, Vec<Subscriber>>,
    by_address: HashMap<String, Vec<Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, subscriber: Subscriber) {
        let list = self.by_topic.entry(topic).or_default();
        if !list.contains(&subscriber) {
            list.push(subscriber);
        }
    }

    pub fn unsubscribe(&mut self, topic: Topic, subscriber: &Subscriber) {
        if let Some(list) = self.by_topic.get_mut(&topic) {
            list.retain(|s| s != subscriber);
        }
    }

    /// Subscribe to transactions touching `addresses`. Strings that are not
    /// addresses on `network` are skipped.
    pub fn subscribe_address(&mut self, subscriber: &Subscriber, addresses: &[String], network: Network) {
        for address in addresses {
            if Address::parse_for(address, network).is_err() {
                continue;
            }
            let list = self.by_address.entry(address.clone()).or_default();
            if !list.contains(subscriber) {
                list.push(subscriber.clone());
            }
        }
    }

    /// Remove the subscriber from `addresses`, or from every address when
    /// `None`.
    pub fn unsubscribe_address(&mut self, subscriber: &Subscriber, addresses: Option<&[String]>) {
        match addresses {
            Some(addresses) => {
                for address in addresses {
                    if let Some(list) = self.by_address.get_mut(address) {
                        list.retain(|s| s != subscriber);
                        if list.is_empty() {
                            self.by_address.remove(address);
                        }
                    }
                }
            }
            None => {
                self.by_address.retain(|_, list| {
                    list.retain(|s| s != subscriber);
                    !list.is_empty()
                });
            }
        }
    }

    /// Drop the subscriber from every topic and address.
    pub fn remove(&mut self, subscriber: &Subscriber) {
        for list in self.by_topic.values_mut() {
            list.retain(|s| s != subscriber);
        }
        self.unsubscribe_address(subscriber, None);
    }

    pub fn topic_subscribers(&self, topic: Topic) -> Vec<Subscriber> {
        self.by_topic.get(&topic).cloned().unwrap_or_default()
    }

    pub fn address_subscribers(&self, address: &str) -> Vec<Subscriber> {
        self.by_address.get(address).cloned().unwrap_or_default()
    }

    pub fn subscribed_addresses(&self) -> usize {
        self.by_address.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "XnQuJpAgEDNtRwoXWLfuEs69cMgCYS8rgs";

    fn other_address() -> String {
        Address::new(Network::Livenet, zipcore_types::AddressKind::ScriptHash, [3; 20]).to_string()
    }

    #[test]
    fn publish_events_order() {
        let names: Vec<_> = publish_events().iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![
                "zipd/rawtransaction",
                "zipd/transactionlock",
                "zipd/hashblock",
                "zipd/addresstxid"
            ]
        );
    }

    #[test]
    fn subscribe_has_no_duplicates() {
        let mut reg = SubscriptionRegistry::new();
        let (sub, _rx) = Subscriber::channel();
        reg.subscribe(Topic::HashBlock, sub.clone());
        reg.subscribe(Topic::HashBlock, sub.clone());
        assert_eq!(reg.topic_subscribers(Topic::HashBlock).len(), 1);
    }

    #[test]
    fn unsubscribe_preserves_order() {
        let mut reg = SubscriptionRegistry::new();
        let (a, _ra) = Subscriber::channel();
        let (b, _rb) = Subscriber::channel();
        let (c, _rc) = Subscriber::channel();
        for s in [&a, &b, &c] {
            reg.subscribe(Topic::RawTransaction, s.clone());
        }
        reg.unsubscribe(Topic::RawTransaction, &b);
        assert_eq!(reg.topic_subscribers(Topic::RawTransaction), vec![a, c]);
    }

    #[test]
    fn invalid_addresses_are_ignored() {
        let mut reg = SubscriptionRegistry::new();
        let (sub, _rx) = Subscriber::channel();
        reg.subscribe_address(&sub, &["notanaddress".to_string(), ADDRESS.to_string()], Network::Livenet);
        assert_eq!(reg.subscribed_addresses(), 1);
        reg.subscribe_address(&sub, &[ADDRESS.to_string()], Network::Livenet);
        assert_eq!(reg.address_subscribers(ADDRESS).len(), 1);
    }

    #[test]
    fn wrong_network_address_is_ignored() {
        let mut reg = SubscriptionRegistry::new();
        let (sub, _rx) = Subscriber::channel();
        reg.subscribe_address(&sub, &[ADDRESS.to_string()], Network::Testnet);
        assert_eq!(reg.subscribed_addresses(), 0);
    }

    #[test]
    fn unsubscribe_address_prunes_empty_lists() {
        let mut reg = SubscriptionRegistry::new();
        let (a, _ra) = Subscriber::channel();
        let (b, _rb) = Subscriber::channel();
        let addresses = vec![ADDRESS.to_string(), other_address()];
        reg.subscribe_address(&a, &addresses, Network::Livenet);
        reg.subscribe_address(&b, &addresses[..1], Network::Livenet);

        reg.unsubscribe_address(&a, Some(&addresses[1..]));
        assert_eq!(reg.subscribed_addresses(), 1);
        assert_eq!(reg.address_subscribers(ADDRESS).len(), 2);

        reg.unsubscribe_address(&a, None);
        assert_eq!(reg.address_subscribers(ADDRESS), vec![b.clone()]);

        reg.unsubscribe_address(&b, None);
        assert_eq!(reg.subscribed_addresses(), 0);
    }

    #[test]
    fn remove_clears_everything() {
        let mut reg = SubscriptionRegistry::new();
        let (sub, _rx) = Subscriber::channel();
        reg.subscribe(Topic::HashBlock, sub.clone());
        reg.subscribe(Topic::TransactionLock, sub.clone());
        reg.subscribe_address(&sub, &[ADDRESS.to_string()], Network::Livenet);
        reg.remove(&sub);
        assert!(reg.topic_subscribers(Topic::HashBlock).is_empty());
        assert!(reg.topic_subscribers(Topic::TransactionLock).is_empty());
        assert_eq!(reg.subscribed_addresses(), 0);
    }

    #[test]
    fn send_fails_after_receiver_dropped() {
        let (sub, rx) = Subscriber::channel();
        drop(rx);
        assert!(!sub.send(Published {
            event: ADDRESS_TXID_EVENT,
            data: Value::Null
        }));
    }
}
