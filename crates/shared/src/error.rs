use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure names the service emits on its own behalf. Remote methods may
/// report other names, so [`RemoteError`] keeps the name as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotAuthorized,
    Exception,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotAuthorized => "NotAuthorized",
            ErrorCode::Exception => "Exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            name: code.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self.name.as_str() {
            "NotAuthorized" => Some(ErrorCode::NotAuthorized),
            "Exception" => Some(ErrorCode::Exception),
            _ => None,
        }
    }

    pub fn not_authorized(method: &str) -> Self {
        Self::new(
            ErrorCode::NotAuthorized,
            format!("The current user cannot call method '{method}'."),
        )
    }

    pub fn exception(method: &str) -> Self {
        Self::new(
            ErrorCode::Exception,
            format!("An exception occurred while calling method '{method}'."),
        )
    }
}

#[derive(Debug, Error)]
pub enum ResponseShapeError {
    #[error("revision 1 response is not a success envelope: {0}")]
    NotAnEnvelope(String),
}
