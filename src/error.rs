//! Error types for the Tenant Engine.

use thiserror::Error;

use crate::engine::protocol::error_codes;

/// Result type alias for Tenant Engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Tenant Engine.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Protocol Errors =====
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    // ===== Application Errors =====
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Sampling not supported")]
    SamplingNotSupported,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ===== Execution Errors =====
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cancelled: operation was cancelled")]
    Cancelled,

    // ===== I/O and Config Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            Self::ResourceNotFound(_) => error_codes::RESOURCE_NOT_FOUND,
            Self::PromptNotFound(_) => error_codes::PROMPT_NOT_FOUND,
            Self::SamplingNotSupported => error_codes::SAMPLING_NOT_SUPPORTED,
            Self::PermissionDenied(_) => error_codes::INVALID_REQUEST,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error belongs to the JSON-RPC protocol family
    /// (malformed envelope, unknown method, schema-invalid params).
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::InvalidRequest(_) | Self::MethodNotFound(_) | Self::InvalidParams(_)
        )
    }

    /// Whether this error is an application-level lookup/support failure.
    pub fn is_application(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::ResourceNotFound(_)
                | Self::PromptNotFound(_)
                | Self::SamplingNotSupported
                | Self::PermissionDenied(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ToolNotFound("missing_tool".to_string());
        assert_eq!(err.to_string(), "Tool not found: missing_tool");

        let err = Error::InvalidParams("missing field 'uri'".to_string());
        assert_eq!(err.to_string(), "Invalid params: missing field 'uri'");

        let err = Error::SamplingNotSupported;
        assert_eq!(err.to_string(), "Sampling not supported");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Parse("bad json".into()).code(), -32700);
        assert_eq!(Error::InvalidRequest("nope".into()).code(), -32600);
        assert_eq!(Error::MethodNotFound("x/y".into()).code(), -32601);
        assert_eq!(Error::InvalidParams("nope".into()).code(), -32602);
        assert_eq!(Error::Internal("boom".into()).code(), -32603);
        assert_eq!(Error::ToolNotFound("t".into()).code(), -32000);
        assert_eq!(Error::ResourceNotFound("u".into()).code(), -32002);
        assert_eq!(Error::PromptNotFound("p".into()).code(), -32003);
        assert_eq!(Error::SamplingNotSupported.code(), -32004);
    }

    #[test]
    fn test_error_taxonomy() {
        assert!(Error::MethodNotFound("x".into()).is_protocol());
        assert!(!Error::MethodNotFound("x".into()).is_application());

        assert!(Error::ToolNotFound("t".into()).is_application());
        assert!(!Error::ToolNotFound("t".into()).is_protocol());

        assert!(!Error::Cancelled.is_protocol());
        assert!(!Error::Cancelled.is_application());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert_eq!(err.code(), -32603);
        assert!(err.to_string().contains("pipe closed"));
    }
}
