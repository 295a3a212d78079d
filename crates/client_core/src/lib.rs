use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::protocol::{ProtocolVersion, RpcRequest, BOOTSTRAP_METHOD};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod error;
mod session_api;
pub mod transport;

pub use error::{RpcError, TransportError};
pub use session_api::SessionApi;
pub use transport::{HttpTransport, Transport, DEFAULT_TIMEOUT};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub version: ProtocolVersion,
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
            version: ProtocolVersion::default(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodStub {
    name: String,
}

/// Nothing is callable until [`initialize`](Self::initialize) has run.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    version: ProtocolVersion,
    token: RwLock<Option<String>>,
    methods: OnceLock<BTreeMap<String, MethodStub>>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, version: ProtocolVersion) -> Self {
        Self {
            transport,
            version,
            token: RwLock::new(None),
            methods: OnceLock::new(),
        }
    }

    pub fn http(config: ClientConfig) -> Result<Self, RpcError> {
        let transport = HttpTransport::new(&config.endpoint, config.timeout).map_err(|source| {
            RpcError::Transport {
                method: BOOTSTRAP_METHOD.to_string(),
                source,
            }
        })?;
        let mut client = Self::new(Arc::new(transport), config.version);
        client.token = RwLock::new(config.token);
        Ok(client)
    }

    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        let client = Self::http(config)?;
        client.initialize().await?;
        Ok(client)
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Token sent in the envelope of every later call.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn initialize(&self) -> Result<(), RpcError> {
        if self.methods.get().is_some() {
            return Err(RpcError::AlreadyInitialized);
        }

        let listed = self.send(BOOTSTRAP_METHOD, Vec::new(), Map::new()).await?;
        let names: Vec<String> = serde_json::from_value(listed).map_err(|e| {
            warn!(method = BOOTSTRAP_METHOD, error = %e, "method list is not a list of names");
            RpcError::Decode {
                method: BOOTSTRAP_METHOD.to_string(),
                message: e.to_string(),
            }
        })?;
        let table: BTreeMap<String, MethodStub> = names
            .into_iter()
            .map(|name| (name.clone(), MethodStub { name }))
            .collect();
        let count = table.len();

        self.methods
            .set(table)
            .map_err(|_| RpcError::AlreadyInitialized)?;
        info!(methods = count, version = ?self.version, "rpc client initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.methods.get().is_some()
    }

    pub fn methods(&self) -> Vec<&str> {
        self.methods
            .get()
            .map(|table| table.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods
            .get()
            .is_some_and(|table| table.contains_key(name))
    }

    pub fn method(&self, name: &str) -> Result<RemoteMethod<'_>, RpcError> {
        let stub = self
            .methods
            .get()
            .and_then(|table| table.get(name))
            .ok_or_else(|| RpcError::MethodNotFound(name.to_string()))?;
        Ok(RemoteMethod { client: self, stub })
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.method(method)?.invoke(args).await
    }

    pub async fn call_kwargs(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        self.method(method)?.invoke_kwargs(args, kwargs).await
    }

    /// `args` must serialize to a JSON array.
    pub async fn call_with<A, T>(&self, method: &str, args: A) -> Result<T, RpcError>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let args = positional_args(method, args)?;
        let value = self.call(method, args).await?;
        serde_json::from_value(value).map_err(|e| {
            warn!(method, error = %e, "rpc result does not match the expected type");
            RpcError::Decode {
                method: method.to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn send(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        let request = RpcRequest::new(method, args, self.version)
            .with_kwargs(kwargs)
            .with_token(self.token().await);
        debug!(method, args = request.args.len(), "rpc call");

        let body = self.transport.post(&request).await.map_err(|source| {
            warn!(method, error = %source, "rpc transport failure");
            RpcError::Transport {
                method: method.to_string(),
                source,
            }
        })?;

        match self.version.decode_outcome(body) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(remote)) => {
                warn!(method, error = %remote, "rpc call failed remotely");
                Err(RpcError::Protocol {
                    method: method.to_string(),
                    source: remote,
                })
            }
            Err(shape) => {
                warn!(method, error = %shape, "rpc response has an unexpected shape");
                Err(RpcError::Decode {
                    method: method.to_string(),
                    message: shape.to_string(),
                })
            }
        }
    }
}

fn positional_args<A: Serialize>(method: &str, args: A) -> Result<Vec<Value>, RpcError> {
    match serde_json::to_value(args) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(Value::Null) => Ok(Vec::new()),
        Ok(other) => Err(RpcError::InvalidArguments {
            method: method.to_string(),
            message: format!("expected a sequence of arguments, got {other}"),
        }),
        Err(e) => Err(RpcError::InvalidArguments {
            method: method.to_string(),
            message: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemoteMethod<'a> {
    client: &'a RpcClient,
    stub: &'a MethodStub,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("version", &self.version)
            .field("methods", &self.methods())
            .finish()
    }
}

impl<'a> RemoteMethod<'a> {
    pub fn name(&self) -> &'a str {
        &self.stub.name
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.client.send(&self.stub.name, args, Map::new()).await
    }

    pub async fn invoke_kwargs(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        self.client.send(&self.stub.name, args, kwargs).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
