//! WebSocket relay for the zip service's publish events.
//!
//! Each connection becomes one subscriber in the service registry. Clients
//! can subscribe to:
//! - `zipd/hashblock`: hashes of new blocks
//! - `zipd/rawtransaction` and `zipd/transactionlock`: transaction hex
//! - `zipd/addresstxid`: txids touching a set of addresses

pub mod error;
pub mod protocol;
pub mod server;

pub use error::WsError;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::WebSocketServer;
