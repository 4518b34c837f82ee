//! The MCP Hub's domain-agnostic gateway machinery (C15): a tool registry,
//! a keyed background-job registry for long-running tools, and the axum
//! SSE/HTTP server that bridges JSON-RPC requests to both. Concrete tool
//! implementations (which need `noteforge-storage`/`noteforge-core` types)
//! are registered by the `noteforge-hub` binary, not defined here.

pub mod jobs;
pub mod registry;
pub mod server;

pub use jobs::{JobRegistry, JobStatus};
pub use registry::{Tool, ToolRegistry};
pub use server::{router, AppState};
