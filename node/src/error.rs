use thiserror::Error;
use zipcore_rpc::RpcError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("config error: {0}")]
    Config(String),

    /// Rejected caller input: bad pagination, range or address count.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Startup(String),

    #[error("{message}")]
    Process { message: String, code: Option<i32> },

    #[error("no zipd node is available")]
    NoDaemon,

    #[error("decode error: {0}")]
    Decode(#[from] zipcore_types::TypesError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl NodeError {
    /// Daemon error code, when the failure came from the daemon.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            NodeError::Rpc(e) => e.code(),
            _ => None,
        }
    }

    pub(crate) fn process(message: impl Into<String>) -> Self {
        NodeError::Process {
            message: message.into(),
            code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_code_passes_through() {
        let err: NodeError = RpcError::daemon(-28, "Loading block index...").into();
        assert_eq!(err.rpc_code(), Some(-28));
        assert_eq!(err.to_string(), "Loading block index...");
        assert_eq!(NodeError::NoDaemon.rpc_code(), None);
    }

    #[test]
    fn process_error_carries_code() {
        let err = NodeError::Process {
            message: "zipd process exited with status 1".into(),
            code: Some(1),
        };
        assert!(matches!(err, NodeError::Process { code: Some(1), .. }));
    }
}
