//! Nullable daemon: scripted results and a call log.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use zipcore_rpc::{DaemonRpc, RpcError};

type Handler = Box<dyn Fn(&[Value]) -> Result<Value, RpcError> + Send + Sync>;

/// Code the daemon uses for an unknown method.
const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// A test daemon that answers from a script instead of a socket.
///
/// Lookup order per call: the method's one-shot queue, then its handler,
/// then its fixed result. An unscripted method fails with "Method not found".
#[derive(Default)]
pub struct NullRpc {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    fixed: Mutex<HashMap<String, Result<Value, RpcError>>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl NullRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call of `method` with `result`.
    pub fn push_result(&self, method: &str, result: Value) -> &Self {
        self.push(method, Ok(result))
    }

    /// Fail the next call of `method` with a daemon error.
    pub fn push_error(&self, method: &str, code: i64, message: &str) -> &Self {
        self.push(method, Err(RpcError::daemon(code, message)))
    }

    pub fn push(&self, method: &str, outcome: Result<Value, RpcError>) -> &Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(method.to_string()).or_default().push_back(outcome);
        }
        self
    }

    /// Answer every call of `method` with `result` once its queue is empty.
    pub fn set_result(&self, method: &str, result: Value) -> &Self {
        self.set(method, Ok(result))
    }

    /// Fail every call of `method` once its queue is empty.
    pub fn set_error(&self, method: &str, code: i64, message: &str) -> &Self {
        self.set(method, Err(RpcError::daemon(code, message)))
    }

    pub fn set(&self, method: &str, outcome: Result<Value, RpcError>) -> &Self {
        if let Ok(mut fixed) = self.fixed.lock() {
            fixed.insert(method.to_string(), outcome);
        }
        self
    }

    /// Compute results for `method` from the call parameters.
    pub fn set_handler<F>(&self, method: &str, handler: F) -> &Self
    where
        F: Fn(&[Value]) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(method.to_string(), Box::new(handler));
        }
        self
    }

    /// Number of calls made to `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|(m, _)| m == method).count())
            .unwrap_or(0)
    }

    /// Parameters of each call made to `method`, in order.
    pub fn params(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(m, _)| m == method)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// Methods called, in order.
    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(m, _)| m.clone()).collect())
            .unwrap_or_default()
    }

    fn answer(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let next = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.get_mut(method).and_then(|q| q.pop_front()));
        if let Some(outcome) = next {
            return outcome;
        }
        if let Ok(handlers) = self.handlers.lock() {
            if let Some(handler) = handlers.get(method) {
                return handler(params);
            }
        }
        self.fixed
            .lock()
            .ok()
            .and_then(|fixed| fixed.get(method).cloned())
            .unwrap_or_else(|| Err(RpcError::daemon(RPC_METHOD_NOT_FOUND, "Method not found")))
    }
}

#[async_trait]
impl DaemonRpc for NullRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let outcome = self.answer(method, &params);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((method.to_string(), params));
        }
        outcome
    }
}
