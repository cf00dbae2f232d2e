//! Nullable infrastructure for deterministic testing.
//!
//! The daemon is abstracted behind [`zipcore_rpc::DaemonRpc`]. This crate
//! provides a scripted implementation that:
//! - Returns queued or fixed results per RPC method
//! - Records every call for assertions
//! - Never touches the network
//!
//! Usage: hand a `NullRpc` to the service wherever an `HttpRpcClient` would go.

pub mod rpc;

pub use rpc::NullRpc;
