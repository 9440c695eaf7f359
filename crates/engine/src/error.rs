//! Structured error type for the orchestration engine.
//!
//! Every variant maps to one of the HTTP status codes in spec §6.2 and one
//! of the JSON-RPC error codes the tool bridge returns to agents.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid design: {0}")]
    InvalidDesign(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("io error: {0}")]
    IOError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("model error: {0}")]
    ModelError(String),

    #[error("tool error: {0}")]
    ToolError(String),
}

impl EngineError {
    /// HTTP status code per spec §6.2.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::InvalidDesign(_) | EngineError::InvalidInput(_) => 400,
            EngineError::AccessDenied(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::TooLarge(_) => 413,
            EngineError::Timeout(_) | EngineError::Cancelled(_) => 408,
            EngineError::IOError(_)
            | EngineError::UpstreamFailure(_)
            | EngineError::ModelError(_)
            | EngineError::ToolError(_) => 500,
        }
    }

    /// JSON-RPC error code for the tool bridge (`POST /mcp`).
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) | EngineError::AccessDenied(_) => -32602,
            EngineError::NotFound(_) => -32001,
            EngineError::Timeout(_) => -32002,
            _ => -32603,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => EngineError::AccessDenied(e.to_string()),
            std::io::ErrorKind::AlreadyExists => EngineError::Conflict(e.to_string()),
            _ => EngineError::IOError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
