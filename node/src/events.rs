//! Service events and the instance-scoped bus that delivers them.

use std::sync::RwLock;

/// Events the service emits to in-process observers.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceEvent {
    /// The chain tip moved to this height.
    Tip(u64),
    /// A new block hash, as raw bytes.
    Block(Vec<u8>),
    /// A new mempool transaction, serialized.
    Tx(Vec<u8>),
    /// An instant-locked transaction, serialized.
    TxLock(Vec<u8>),
    /// Initial sync finished. Emitted once.
    Synced,
    /// Start-up finished and the genesis block is loaded.
    Ready,
    /// A background failure nobody was waiting on.
    Error(String),
}

type Listener = Box<dyn Fn(&ServiceEvent) + Send + Sync>;

/// Synchronous fan-out event bus.
///
/// Listeners are invoked inline on the emitting task; keep handlers fast.
/// A listener must not subscribe from inside its own callback.
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: Listener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn emit(&self, event: &ServiceEvent) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
