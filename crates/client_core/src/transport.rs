use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use shared::protocol::RpcRequest;
use url::Url;

use crate::error::TransportError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &RpcRequest) -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    http: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint).map_err(|e| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(TransportError::from_reqwest)?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: &RpcRequest) -> Result<Value, TransportError> {
        let res = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;
        let status = res.status();
        if status != StatusCode::OK {
            return Err(TransportError::Status(status.as_u16()));
        }
        res.json::<Value>()
            .await
            .map_err(TransportError::from_reqwest)
    }
}
