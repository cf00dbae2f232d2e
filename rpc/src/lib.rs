//! JSON-RPC client for the zipd daemon.
//!
//! Provides:
//! - the [`DaemonRpc`] trait, the seam every service component calls through
//! - [`HttpRpcClient`], the reqwest-backed implementation (JSON-RPC 1.0, basic auth)
//! - typed response shapes for the methods the service decodes

pub mod api;
pub mod client;
pub mod error;
pub mod responses;

pub use api::DaemonRpc;
pub use client::{HttpRpcClient, RpcEndpoint};
pub use error::RpcError;
