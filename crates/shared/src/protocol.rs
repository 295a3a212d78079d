use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RemoteError, ResponseShapeError};

pub const BOOTSTRAP_METHOD: &str = "getMethods";
pub const ERROR_MARKER: &str = "SimpleWebAPIError";
pub const ERROR_MESSAGE_KEY: &str = "Message";

const UNKNOWN_ERROR_NAME: &str = "SimpleWebAPIError";
const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
}

impl ProtocolVersion {
    /// Requests that do not declare a version predate revision 2.
    pub fn undeclared() -> Self {
        ProtocolVersion::V1
    }

    pub fn encode_outcome(self, outcome: &Result<Value, RemoteError>) -> Value {
        match (self, outcome) {
            (ProtocolVersion::V1, Ok(result)) => serde_json::json!({
                "success": true,
                "result": result,
            }),
            (ProtocolVersion::V1, Err(err)) => serde_json::json!({
                "success": false,
                "error": err.name,
                "error_message": err.message,
            }),
            (ProtocolVersion::V2, Ok(result)) => result.clone(),
            (ProtocolVersion::V2, Err(err)) => serde_json::json!({
                ERROR_MARKER: err.name,
                ERROR_MESSAGE_KEY: err.message,
            }),
        }
    }

    pub fn decode_outcome(
        self,
        body: Value,
    ) -> Result<Result<Value, RemoteError>, ResponseShapeError> {
        match self {
            ProtocolVersion::V1 => {
                let envelope: LegacyEnvelope = serde_json::from_value(body)
                    .map_err(|e| ResponseShapeError::NotAnEnvelope(e.to_string()))?;
                if envelope.success {
                    Ok(Ok(envelope.result))
                } else {
                    Ok(Err(RemoteError::named(
                        envelope.error.unwrap_or_else(|| UNKNOWN_ERROR_NAME.to_string()),
                        envelope
                            .error_message
                            .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()),
                    )))
                }
            }
            ProtocolVersion::V2 => Ok(decode_marked(body)),
        }
    }
}

fn decode_marked(body: Value) -> Result<Value, RemoteError> {
    let Value::Object(map) = &body else {
        return Ok(body);
    };
    let Some(name) = map.get(ERROR_MARKER) else {
        return Ok(body);
    };
    let name = match name {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let message = map
        .get(ERROR_MESSAGE_KEY)
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ERROR_MESSAGE)
        .to_string();
    Err(RemoteError::named(name, message))
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(format!("unsupported protocol version {other}")),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(value: ProtocolVersion) -> Self {
        match value {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
    #[serde(default = "ProtocolVersion::undeclared")]
    pub version: ProtocolVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, args: Vec<Value>, version: ProtocolVersion) -> Self {
        Self {
            method: method.into(),
            args,
            kwargs: Map::new(),
            version,
            token: None,
        }
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyEnvelope {
    success: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
