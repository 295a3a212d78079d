use shared::error::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("request timed out")]
    Timeout,
    #[error("failed to reach server: {0}")]
    Connect(String),
    #[error("response body is not valid JSON: {0}")]
    Body(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else if err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport failure calling '{method}': {source}")]
    Transport {
        method: String,
        source: TransportError,
    },
    #[error("'{method}' failed remotely: {source}")]
    Protocol { method: String, source: RemoteError },
    #[error("method '{0}' not found")]
    MethodNotFound(String),
    #[error("client methods are already initialized")]
    AlreadyInitialized,
    #[error("invalid arguments for '{method}': {message}")]
    InvalidArguments { method: String, message: String },
    #[error("unexpected response from '{method}': {message}")]
    Decode { method: String, message: String },
}

impl RpcError {
    /// The server-supplied failure, for protocol errors.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Protocol { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            RpcError::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}
