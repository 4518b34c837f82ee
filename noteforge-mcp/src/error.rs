//! MCP-specific error types.

/// Errors that can occur during MCP client/server operation.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("internal error: {message}")]
    InternalError { message: String },

    #[error("tool execution failed: {message}")]
    ToolError { message: String },

    #[error("resource not found: {uri}")]
    ResourceNotFound { uri: String },

    #[error("transport error: {message}")]
    TransportError { message: String },

    #[error("server not initialized")]
    NotInitialized,

    #[error("call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("call canceled")]
    Canceled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to a JSON-RPC error code.
    pub fn error_code(&self) -> i64 {
        match self {
            McpError::ParseError { .. } => -32700,
            McpError::InvalidRequest { .. } => -32600,
            McpError::MethodNotFound { .. } => -32601,
            McpError::InvalidParams { .. } => -32602,
            McpError::InternalError { .. } => -32603,
            McpError::ToolError { .. } => -32000,
            McpError::ResourceNotFound { .. } => -32001,
            McpError::TransportError { .. } => -32002,
            McpError::NotInitialized => -32003,
            McpError::Timeout { .. } => -32004,
            McpError::Canceled => -32005,
            McpError::Io(_) => -32603,
            McpError::Json(_) => -32700,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_jsonrpc_reserved_ranges() {
        assert_eq!(McpError::ParseError { message: "x".into() }.error_code(), -32700);
        assert_eq!(McpError::MethodNotFound { method: "x".into() }.error_code(), -32601);
        assert_eq!(McpError::NotInitialized.error_code(), -32003);
        assert_eq!(McpError::Timeout { timeout_secs: 10 }.error_code(), -32004);
        assert_eq!(McpError::Canceled.error_code(), -32005);
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let mcp_err: McpError = io_err.into();
        assert!(matches!(mcp_err, McpError::Io(_)));
    }
}
