//! zipcore service core: keeps one or more zipd daemons usable and puts a
//! cached, fail-over query façade and a notification bridge in front of
//! them.
//!
//! The service:
//! - spawns and supervises a local daemon, or connects to remote ones
//! - rotates daemon calls across every connected node
//! - tracks the chain tip and initial sync progress
//! - relays ZMQ block and transaction notifications to subscribers
//! - answers address, block, transaction and governance queries

pub mod address_queries;
pub mod cache;
pub mod chain_queries;
pub mod config;
pub mod daemon_conf;
pub mod error;
pub mod events;
pub mod known_set;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod node_record;
pub mod pagination;
pub mod pool;
pub mod service;
pub mod shutdown;
pub mod subscriptions;
pub mod supervisor;
pub mod tip;
pub mod utxo;
pub mod zmq_bridge;

pub use address_queries::{HistoryOptions, SummaryOptions, TxidsOptions, UtxoOptions};
pub use cache::CacheSet;
pub use chain_queries::{BlockRef, GovObjectType, SendOptions};
pub use config::{ConnectConfig, ServiceConfig, SpawnConfig};
pub use error::NodeError;
pub use events::{EventBus, ServiceEvent};
pub use logging::{init_logging, LogFormat};
pub use metrics::ServiceMetrics;
pub use node_record::NodeRecord;
pub use pool::NodePool;
pub use service::ZipService;
pub use shutdown::ShutdownController;
pub use subscriptions::{publish_events, PublishEvent, Published, Subscriber, Topic};
pub use tip::{TipPhase, TipTracker};
