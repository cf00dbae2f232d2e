//! Fundamental types shared by every zipcore crate.
//!
//! This crate is the parsing collaborator of the service core: network
//! parameters, base58check addresses, standard script templates and a
//! decoder for raw transactions and blocks as the daemon serializes them.
//! It performs no validation beyond what is needed to read the bytes.

pub mod address;
pub mod block;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod network;
pub mod script;
pub mod transaction;

pub use address::{Address, AddressKind};
pub use block::{Block, BlockHeader};
pub use error::TypesError;
pub use hash::{hash160, reversed_hex, sha256d};
pub use network::Network;
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};
