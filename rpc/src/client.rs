//! reqwest-backed JSON-RPC 1.0 client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::{DaemonRpc, RpcError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to reach one daemon's RPC interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl RpcEndpoint {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// HTTP client for one daemon.
///
/// Wraps `reqwest::Client` with the endpoint URL and credentials. The daemon
/// answers RPC errors with a non-2xx status and a JSON body, so the body is
/// inspected before the status.
pub struct HttpRpcClient {
    http: reqwest::Client,
    endpoint: RpcEndpoint,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to create HTTP client: {e}")))?;
        let url = endpoint.url();
        Ok(Self {
            http,
            endpoint,
            url,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl DaemonRpc for HttpRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "1.0", "id": id, "method": method, "params": params });
        trace!(method, id, url = %self.url, "rpc request");

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(RpcError::Transport(format!("daemon returned HTTP {status}")));
            }
            Err(e) => return Err(RpcError::InvalidResponse(format!("{method}: {e}"))),
        };

        if let Some(err) = parsed.error {
            return Err(RpcError::Daemon {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result)
    }
}
