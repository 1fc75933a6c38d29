// Error types for the Trellis composition engine.
//
// Configuration errors surface at registration time and name the offending
// controller. Request-time failures travel the error-handler chain as
// `ErrorValue`, which models the heterogeneous shapes user code forwards:
// bare status numbers, bare strings, status+message pairs, JSON payloads.

use thiserror::Error;

/// Registration-time errors. These fail fast; none of them are deferred to
/// request time.
#[derive(Error, Debug)]
pub enum Error {
    #[error("controller {0} is not registered in the descriptor store")]
    UnknownController(String),

    #[error("controller {0} has no router metadata but was registered as a child")]
    ChildWithoutRouter(String),

    #[error("route {1} on controller {0} refers to an unknown handler member")]
    UnknownMember(String, String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A request-time error value flowing through an error-handler chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorValue {
    /// A bare status number, e.g. `403`.
    Status(u16),
    /// A bare message, possibly carrying a leading status token ("404 gone").
    Message(String),
    /// An explicit status and message.
    StatusMessage { status: u16, message: String },
    /// A structured payload; a numeric `status` or `statusCode` member is
    /// honored by the fallback handler.
    Payload(serde_json::Value),
    /// An engine-side failure (extraction, serialization, programmer misuse).
    Internal(String),
}

impl ErrorValue {
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        ErrorValue::StatusMessage {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ErrorValue::Internal(message.into())
    }

    /// The explicit status carried by this value, if any.
    pub fn explicit_status(&self) -> Option<u16> {
        match self {
            ErrorValue::Status(s) => Some(*s),
            ErrorValue::StatusMessage { status, .. } => Some(*status),
            ErrorValue::Payload(v) => v
                .get("status")
                .or_else(|| v.get("statusCode"))
                .and_then(|s| s.as_u64())
                .and_then(|s| u16::try_from(s).ok()),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorValue::Status(s) => write!(f, "{}", s),
            ErrorValue::Message(m) => write!(f, "{}", m),
            ErrorValue::StatusMessage { status, message } => {
                write!(f, "{} {}", status, message)
            }
            ErrorValue::Payload(v) => write!(f, "{}", v),
            ErrorValue::Internal(m) => write!(f, "{}", m),
        }
    }
}

impl From<u16> for ErrorValue {
    fn from(status: u16) -> Self {
        ErrorValue::Status(status)
    }
}

impl From<&str> for ErrorValue {
    fn from(message: &str) -> Self {
        ErrorValue::Message(message.to_string())
    }
}

impl From<String> for ErrorValue {
    fn from(message: String) -> Self {
        ErrorValue::Message(message)
    }
}

impl From<serde_json::Value> for ErrorValue {
    fn from(payload: serde_json::Value) -> Self {
        ErrorValue::Payload(payload)
    }
}

impl From<Error> for ErrorValue {
    fn from(err: Error) -> Self {
        ErrorValue::Internal(err.to_string())
    }
}
