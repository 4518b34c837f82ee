//! Concrete [`Tool`] implementations the Hub exposes over MCP. Each wraps
//! one piece of domain state (`noteforge_storage::MemoryStorage`,
//! [`crate::kb_index::KbIndex`], [`crate::reindex_jobs::ReindexJobs`],
//! [`crate::mcp_registry::McpServerRegistry`]) behind the tool-name
//! contract the bot's services call by name.
//!
//! Every tool returns its structured payload JSON-encoded as a string
//! inside `CallToolResult::text(...)`'s single content block — the
//! convention `noteforge_core::reindex::parse_tool_result` already assumes
//! on the client side.

use std::sync::Arc;

use async_trait::async_trait;
use noteforge_core::types::{MemoryRecord, ReindexStats};
use noteforge_mcp::hub::registry::Tool;
use noteforge_mcp::protocol::CallToolResult;
use noteforge_mcp::McpError;
use serde::Deserialize;
use serde_json::json;

use crate::kb_index::{DocumentInput, KbIndex};
use crate::mcp_registry::McpServerRegistry;
use crate::reindex_jobs::ReindexJobs;
use noteforge_storage::MemoryStorage;

fn bad_params(e: impl std::fmt::Display) -> McpError {
    McpError::InvalidParams { message: e.to_string() }
}

fn tool_failed(e: impl std::fmt::Display) -> McpError {
    McpError::ToolError { message: e.to_string() }
}

fn json_result(value: impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string(&value).map_err(|e| McpError::InternalError { message: e.to_string() })?;
    Ok(CallToolResult::text(text))
}

pub struct StoreMemoryTool {
    storage: Arc<dyn MemoryStorage>,
}

impl StoreMemoryTool {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct StoreMemoryArgs {
    content: String,
    user_id: i64,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

fn default_category() -> String {
    "general".to_string()
}

#[async_trait]
impl Tool for StoreMemoryTool {
    fn name(&self) -> &str {
        "store_memory"
    }
    fn description(&self) -> &str {
        "Stores a memory record for a user, returning its generated id."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string"},
                "user_id": {"type": "integer"},
                "category": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"}
            },
            "required": ["content", "user_id"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: StoreMemoryArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        let mut record = MemoryRecord::new(args.user_id, args.content, args.category);
        record.tags = args.tags;
        if !args.metadata.is_null() {
            record.metadata = args.metadata;
        }
        let saved = self.storage.store(record).await.map_err(tool_failed)?;
        json_result(json!({ "id": saved.id }))
    }
}

pub struct RetrieveMemoryTool {
    storage: Arc<dyn MemoryStorage>,
}

impl RetrieveMemoryTool {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct RetrieveMemoryArgs {
    user_id: i64,
    #[serde(default)]
    query: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[async_trait]
impl Tool for RetrieveMemoryTool {
    fn name(&self) -> &str {
        "retrieve_memory"
    }
    fn description(&self) -> &str {
        "Retrieves a user's memory records, optionally filtered by query text and category."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "user_id": {"type": "integer"},
                "query": {"type": "string"},
                "category": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["user_id"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: RetrieveMemoryArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        let records = self
            .storage
            .retrieve(args.user_id, &args.query, args.category.as_deref(), args.limit)
            .await
            .map_err(tool_failed)?;
        json_result(records)
    }
}

pub struct ListCategoriesTool {
    storage: Arc<dyn MemoryStorage>,
}

impl ListCategoriesTool {
    pub fn new(storage: Arc<dyn MemoryStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Deserialize)]
struct ListCategoriesArgs {
    user_id: i64,
}

#[async_trait]
impl Tool for ListCategoriesTool {
    fn name(&self) -> &str {
        "list_categories"
    }
    fn description(&self) -> &str {
        "Lists a user's memory categories with a record count per category."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "user_id": {"type": "integer"} },
            "required": ["user_id"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: ListCategoriesArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        let categories = self.storage.list_categories(args.user_id).await.map_err(tool_failed)?;

        // `MemoryStorage::list_categories` only names the categories; the
        // count each needs comes from a second, per-category retrieve. Fine
        // at per-user memory scale; revisit if a backend ever fronts this
        // with a single aggregate query.
        let mut counted = Vec::with_capacity(categories.len());
        for category in categories {
            let records = self
                .storage
                .retrieve(args.user_id, "", Some(&category), usize::MAX)
                .await
                .map_err(tool_failed)?;
            counted.push(json!({ "category": category, "count": records.len() }));
        }
        json_result(counted)
    }
}

pub struct VectorSearchTool {
    index: Arc<KbIndex>,
}

impl VectorSearchTool {
    pub fn new(index: Arc<KbIndex>) -> Self {
        Self { index }
    }
}

#[derive(Deserialize)]
struct VectorSearchArgs {
    query: String,
    kb_id: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }
    fn description(&self) -> &str {
        "Searches a knowledge base's indexed Markdown files by embedding similarity."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "kb_id": {"type": "string"},
                "top_k": {"type": "integer"}
            },
            "required": ["query", "kb_id"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: VectorSearchArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        let hits = self
            .index
            .search(&args.kb_id, &args.query, args.top_k)
            .await
            .map_err(tool_failed)?;
        json_result(hits)
    }
}

pub struct ReindexVectorTool {
    index: Arc<KbIndex>,
    jobs: Arc<ReindexJobs>,
}

impl ReindexVectorTool {
    pub fn new(index: Arc<KbIndex>, jobs: Arc<ReindexJobs>) -> Self {
        Self { index, jobs }
    }
}

#[derive(Deserialize)]
struct ReindexVectorArgs {
    kb_id: String,
    #[serde(default)]
    documents: Vec<DocumentInput>,
    #[serde(default)]
    #[allow(dead_code)]
    force: bool,
}

#[async_trait]
impl Tool for ReindexVectorTool {
    fn name(&self) -> &str {
        "reindex_vector"
    }
    fn description(&self) -> &str {
        "Starts a background reindex of a knowledge base's Markdown documents; returns immediately."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "kb_id": {"type": "string"},
                "documents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "path": {"type": "string"}, "content": {"type": "string"} },
                        "required": ["path", "content"]
                    }
                },
                "force": {"type": "boolean"}
            },
            "required": ["kb_id"]
        })
    }

    // Only starts the job and returns; `run_reindex` below does the work.
    // Stays well under the registry's default 10s timeout either way.
    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: ReindexVectorArgs = serde_json::from_value(arguments).map_err(bad_params)?;

        if let Err(err) = self.jobs.spawn_exclusive(&args.kb_id) {
            return Err(McpError::ToolError { message: err.to_string() });
        }

        let index = self.index.clone();
        let jobs = self.jobs.clone();
        let kb_id = args.kb_id.clone();
        let documents = args.documents;
        tokio::spawn(async move {
            jobs.mark_processing(&kb_id);
            match index.reindex(&kb_id, &documents).await {
                Ok(count) => jobs.complete(&kb_id, ReindexStats { docs: count as u64, chunks: count as u64, errors: Vec::new() }),
                Err(message) => jobs.fail(&kb_id, message),
            }
        });

        json_result(json!({ "kb_id": args.kb_id, "status": "started" }))
    }
}

pub struct GetReindexStatusTool {
    jobs: Arc<ReindexJobs>,
}

impl GetReindexStatusTool {
    pub fn new(jobs: Arc<ReindexJobs>) -> Self {
        Self { jobs }
    }
}

#[derive(Deserialize)]
struct GetReindexStatusArgs {
    kb_id: String,
}

#[async_trait]
impl Tool for GetReindexStatusTool {
    fn name(&self) -> &str {
        "get_reindex_status"
    }
    fn description(&self) -> &str {
        "Reports the current ReindexJob for a kb_id, if one has ever been started."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "kb_id": {"type": "string"} },
            "required": ["kb_id"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: GetReindexStatusArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        match self.jobs.get(&args.kb_id) {
            Some(job) => json_result(job),
            None => Err(McpError::ResourceNotFound { uri: args.kb_id }),
        }
    }
}

pub struct ListMcpServersTool {
    registry: Arc<McpServerRegistry>,
}

impl ListMcpServersTool {
    pub fn new(registry: Arc<McpServerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ListMcpServersTool {
    fn name(&self) -> &str {
        "list_mcp_servers"
    }
    fn description(&self) -> &str {
        "Lists every registered external MCP server and whether it's enabled."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn call(&self, _arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        json_result(self.registry.list())
    }
}

pub struct GetMcpServerTool {
    registry: Arc<McpServerRegistry>,
}

impl GetMcpServerTool {
    pub fn new(registry: Arc<McpServerRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Deserialize)]
struct GetMcpServerArgs {
    name: String,
}

#[async_trait]
impl Tool for GetMcpServerTool {
    fn name(&self) -> &str {
        "get_mcp_server"
    }
    fn description(&self) -> &str {
        "Fetches one registered external MCP server's configuration by name."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "name": {"type": "string"} },
            "required": ["name"]
        })
    }
    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: GetMcpServerArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        match self.registry.get(&args.name) {
            Some(entry) => json_result(entry),
            None => Err(McpError::ResourceNotFound { uri: args.name }),
        }
    }
}

pub struct RegisterMcpServerTool {
    registry: Arc<McpServerRegistry>,
}

impl RegisterMcpServerTool {
    pub fn new(registry: Arc<McpServerRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Deserialize)]
struct RegisterMcpServerArgs {
    name: String,
    config: noteforge_core::types::McpServerConfig,
}

#[async_trait]
impl Tool for RegisterMcpServerTool {
    fn name(&self) -> &str {
        "register_mcp_server"
    }
    fn description(&self) -> &str {
        "Registers (or replaces) an external MCP server's configuration, enabled by default."
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "name": {"type": "string"}, "config": {"type": "object"} },
            "required": ["name", "config"]
        })
    }
    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: RegisterMcpServerArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        self.registry.register(args.name.clone(), args.config).map_err(tool_failed)?;
        json_result(json!({ "name": args.name, "registered": true }))
    }
}

pub struct SetMcpServerEnabledTool {
    registry: Arc<McpServerRegistry>,
    enabled: bool,
    name: &'static str,
}

impl SetMcpServerEnabledTool {
    pub fn enable(registry: Arc<McpServerRegistry>) -> Self {
        Self { registry, enabled: true, name: "enable_mcp_server" }
    }

    pub fn disable(registry: Arc<McpServerRegistry>) -> Self {
        Self { registry, enabled: false, name: "disable_mcp_server" }
    }
}

#[derive(Deserialize)]
struct SetMcpServerEnabledArgs {
    name: String,
}

#[async_trait]
impl Tool for SetMcpServerEnabledTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        if self.enabled {
            "Enables a previously registered external MCP server."
        } else {
            "Disables a registered external MCP server without forgetting its configuration."
        }
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "name": {"type": "string"} },
            "required": ["name"]
        })
    }
    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let args: SetMcpServerEnabledArgs = serde_json::from_value(arguments).map_err(bad_params)?;
        self.registry.set_enabled(&args.name, self.enabled).map_err(tool_failed)?;
        json_result(json!({ "name": args.name, "enabled": self.enabled }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteforge_storage::{build_storage, StorageKind, VectorStoreSettings};

    fn memory_storage() -> (Arc<dyn MemoryStorage>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let vector = VectorStoreSettings { endpoint: "sqlite://unused".to_string(), embedding_model: "unused".to_string() };
        let storage: Arc<dyn MemoryStorage> = build_storage(StorageKind::Json, tmp.path(), &vector, None).unwrap().into();
        (storage, tmp)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_through_tools() {
        let (storage, _tmp) = memory_storage();
        let store_tool = StoreMemoryTool::new(storage.clone());
        let retrieve_tool = RetrieveMemoryTool::new(storage);

        let stored = store_tool
            .call(json!({ "content": "buy oat milk", "user_id": 1, "category": "groceries" }))
            .await
            .unwrap();
        let CallToolResult { content, .. } = stored;
        assert!(matches!(&content[0], noteforge_mcp::protocol::ToolContent::Text { text } if text.contains("\"id\"")));

        let found = retrieve_tool.call(json!({ "user_id": 1, "query": "oat" })).await.unwrap();
        let noteforge_mcp::protocol::ToolContent::Text { text } = &found.content[0] else {
            panic!("expected text content");
        };
        let records: Vec<MemoryRecord> = serde_json::from_str(text).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn list_categories_reports_counts() {
        let (storage, _tmp) = memory_storage();
        storage.store(MemoryRecord::new(1, "a", "alpha")).await.unwrap();
        storage.store(MemoryRecord::new(1, "b", "alpha")).await.unwrap();
        storage.store(MemoryRecord::new(1, "c", "beta")).await.unwrap();

        let tool = ListCategoriesTool::new(storage);
        let result = tool.call(json!({ "user_id": 1 })).await.unwrap();
        let noteforge_mcp::protocol::ToolContent::Text { text } = &result.content[0] else {
            panic!("expected text content");
        };
        let counted: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(counted[0]["category"], "alpha");
        assert_eq!(counted[0]["count"], 2);
        assert_eq!(counted[1]["category"], "beta");
        assert_eq!(counted[1]["count"], 1);
    }

    #[tokio::test]
    async fn reindex_then_status_reports_completed() {
        let tmp = tempfile::tempdir().unwrap();
        struct FakeEmbeddings;
        #[async_trait]
        impl noteforge_storage::vector_store::EmbeddingProvider for FakeEmbeddings {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, noteforge_core::error::StorageError> {
                Ok(vec![1.0, 0.0])
            }
        }
        let index = Arc::new(KbIndex::new(tmp.path().to_path_buf(), Box::new(FakeEmbeddings)).unwrap());
        let jobs = Arc::new(ReindexJobs::new());
        let reindex_tool = ReindexVectorTool::new(index, jobs.clone());
        let status_tool = GetReindexStatusTool::new(jobs);

        reindex_tool
            .call(json!({ "kb_id": "1:notes", "documents": [{"path": "a.md", "content": "hello"}] }))
            .await
            .unwrap();

        // Reindex work is spawned in the background; poll briefly for completion.
        for _ in 0..20 {
            let result = status_tool.call(json!({ "kb_id": "1:notes" })).await.unwrap();
            let noteforge_mcp::protocol::ToolContent::Text { text } = &result.content[0] else {
                panic!("expected text content");
            };
            if text.contains("\"completed\"") {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("reindex did not complete in time");
    }

    #[tokio::test]
    async fn reindex_twice_without_waiting_rejects_second_call() {
        let tmp = tempfile::tempdir().unwrap();
        struct SlowEmbeddings;
        #[async_trait]
        impl noteforge_storage::vector_store::EmbeddingProvider for SlowEmbeddings {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, noteforge_core::error::StorageError> {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                Ok(vec![1.0])
            }
        }
        let index = Arc::new(KbIndex::new(tmp.path().to_path_buf(), Box::new(SlowEmbeddings)).unwrap());
        let jobs = Arc::new(ReindexJobs::new());
        let reindex_tool = ReindexVectorTool::new(index, jobs);

        reindex_tool
            .call(json!({ "kb_id": "1:notes", "documents": [{"path": "a.md", "content": "hello"}] }))
            .await
            .unwrap();
        let err = reindex_tool
            .call(json!({ "kb_id": "1:notes", "documents": [] }))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolError { .. }));
    }
}
