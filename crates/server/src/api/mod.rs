use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use shared::{
    domain::CallerDetails,
    error::RemoteError,
    protocol::{RpcRequest, BOOTSTRAP_METHOD},
};
use tracing::{debug, error, warn};

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn user_for_token(&self, token: &str) -> Result<Option<String>>;
    async fn capabilities(&self, user: &str) -> Result<BTreeSet<String>>;
}

/// The HTTP layer turns the final token into a cookie.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub ip: Option<SocketAddr>,
    pub user: Option<String>,
    pub capabilities: BTreeSet<String>,
    token: Arc<Mutex<Option<String>>>,
}

impl CallContext {
    pub fn new(
        ip: Option<SocketAddr>,
        user: Option<String>,
        capabilities: BTreeSet<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            ip,
            user,
            capabilities,
            token: Arc::new(Mutex::new(token)),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None, None, BTreeSet::new(), None)
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Map<String, Value>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, keyword: Map<String, Value>) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    /// An absent argument deserializes from `null`.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T> {
        let value = self
            .positional
            .get(index)
            .or_else(|| self.keyword.get(name))
            .cloned()
            .unwrap_or(Value::Null);
        serde_json::from_value(value).with_context(|| format!("invalid argument '{name}'"))
    }
}

type MethodFuture = BoxFuture<'static, Result<Value>>;
type MethodHandler = Arc<dyn Fn(CallContext, CallArgs) -> MethodFuture + Send + Sync>;

#[derive(Clone)]
enum Handler {
    ListMethods,
    CallerDetails,
    HasCapability,
    Custom(MethodHandler),
}

#[derive(Clone)]
struct RegisteredMethod {
    handler: Handler,
    capability: Option<String>,
}

pub struct RpcService {
    methods: BTreeMap<String, RegisteredMethod>,
    default_capability: Option<String>,
    authenticator: Arc<dyn Authenticator>,
}

impl RpcService {
    pub fn new(authenticator: Arc<dyn Authenticator>, default_capability: Option<String>) -> Self {
        let mut service = Self {
            methods: BTreeMap::new(),
            default_capability: None,
            authenticator,
        };
        service.insert(BOOTSTRAP_METHOD, Handler::ListMethods, None);
        service.insert("getDetails", Handler::CallerDetails, None);
        service.insert("hasCapability", Handler::HasCapability, None);
        service.default_capability = default_capability;
        service
    }

    pub fn add<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(CallContext, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let capability = self.default_capability.clone();
        self.add_with_capability(name, capability.as_deref(), handler);
    }

    pub fn add_with_capability<F, Fut>(&mut self, name: &str, capability: Option<&str>, handler: F)
    where
        F: Fn(CallContext, CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |ctx, args| Box::pin(handler(ctx, args)));
        self.insert(name, Handler::Custom(handler), capability.map(str::to_string));
    }

    fn insert(&mut self, name: &str, handler: Handler, capability: Option<String>) {
        if self
            .methods
            .insert(
                name.to_string(),
                RegisteredMethod {
                    handler,
                    capability,
                },
            )
            .is_some()
        {
            debug!(method = name, "replaced rpc method");
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn required_capability(&self, method: &str) -> Option<&str> {
        self.methods
            .get(method)
            .and_then(|m| m.capability.as_deref())
    }

    /// The envelope token wins over the cookie.
    pub async fn context_for(
        &self,
        ip: Option<SocketAddr>,
        envelope_token: Option<String>,
        cookie_token: Option<String>,
    ) -> CallContext {
        let token = envelope_token.or(cookie_token);
        let user = match &token {
            Some(token) => self
                .authenticator
                .user_for_token(token)
                .await
                .unwrap_or_else(|error| {
                    warn!(%error, "session token lookup failed");
                    None
                }),
            None => None,
        };
        let capabilities = match &user {
            Some(user) => self
                .authenticator
                .capabilities(user)
                .await
                .unwrap_or_else(|error| {
                    warn!(%user, %error, "capability lookup failed");
                    BTreeSet::new()
                }),
            None => BTreeSet::new(),
        };
        CallContext::new(ip, user, capabilities, token)
    }

    pub async fn handle(&self, request: RpcRequest, ctx: &CallContext) -> Value {
        let version = request.version;
        let outcome = self.invoke(request, ctx).await;
        version.encode_outcome(&outcome)
    }

    pub async fn invoke(
        &self,
        request: RpcRequest,
        ctx: &CallContext,
    ) -> std::result::Result<Value, RemoteError> {
        let method = request.method;
        let Some(registered) = self.methods.get(&method).cloned() else {
            warn!(%method, "call to unknown method");
            return Err(RemoteError::exception(&method));
        };

        if let Some(required) = &registered.capability {
            if !ctx.has_capability(required) {
                debug!(%method, user = ?ctx.user, required = %required, "call not authorized");
                return Err(RemoteError::not_authorized(&method));
            }
        }

        let args = CallArgs::new(request.args, request.kwargs);
        let result = match registered.handler {
            Handler::ListMethods => Ok(json!(self.method_names())),
            Handler::CallerDetails => Ok(json!(CallerDetails {
                user: ctx.user.clone(),
                capabilities: ctx.capabilities.iter().cloned().collect(),
            })),
            Handler::HasCapability => args
                .get::<String>(0, "capability")
                .map(|capability| Value::Bool(ctx.has_capability(&capability))),
            Handler::Custom(handler) => handler(ctx.clone(), args).await,
        };

        result.map_err(|err| {
            let message = format!("{err:#}");
            error!(%method, error = %message, "rpc method failed");
            RemoteError::exception(&method)
        })
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
