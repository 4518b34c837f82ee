//! # noteforge-mcp
//!
//! JSON-RPC/MCP wire protocol, transports, client, and the Hub's built-in
//! tool registry and HTTP gateway.

pub mod client;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod transport;

pub use client::McpClient;
pub use error::McpError;
