//! Tool registry and handler abstraction.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::{ContentBlock, JsonRpcNotification, Tool, ToolResult};
use crate::engine::session::SessionManager;
use crate::error::{Error, Result};

/// Handler for tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult>;
}

impl std::fmt::Debug for dyn ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandler")
            .field("name", &self.definition().name)
            .finish()
    }
}

/// Adapter turning a closure into a [`ToolHandler`].
pub struct FnTool<F> {
    tool: Tool,
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(HashMap<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolResult>> + Send,
{
    fn definition(&self) -> Tool {
        self.tool.clone()
    }

    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult> {
        (self.f)(arguments).await
    }
}

/// Build a tool handler from a definition and a closure.
pub fn tool_fn<F, Fut>(tool: Tool, f: F) -> FnTool<F>
where
    F: Fn(HashMap<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolResult>> + Send,
{
    FnTool { tool, f }
}

/// Per-instance registry of tool handlers.
///
/// Mutations emit `notifications/tools/list_changed` to every OPERATING
/// session.
pub struct ToolRegistry {
    sessions: Arc<SessionManager>,
    tools: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool handler. Upserts by name; re-registering an existing
    /// name replaces the previous handler.
    pub async fn register<T: ToolHandler + 'static>(&self, handler: T) {
        self.register_arc(Arc::new(handler)).await;
    }

    /// Register a tool handler (Arc version).
    pub async fn register_arc(&self, handler: Arc<dyn ToolHandler>) {
        let tool = handler.definition();
        self.tools.write().await.insert(tool.name.clone(), handler);
        self.notify_list_changed().await;
    }

    /// Remove a tool by name. Returns false if it was not registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().await.remove(name).is_some();
        if removed {
            self.notify_list_changed().await;
        }
        removed
    }

    /// Get all registered tool definitions, sorted by name.
    pub async fn list(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .await
            .values()
            .map(|h| h.definition())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Get a tool handler by name.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn ToolHandler>> {
        self.tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Check if a tool exists.
    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Number of registered tools.
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    async fn notify_list_changed(&self) {
        self.sessions
            .broadcast_operating(JsonRpcNotification::new(
                "notifications/tools/list_changed",
                None,
            ))
            .await;
    }
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument: {name}")))
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &HashMap<String, Value>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract a required integer argument.
pub fn get_int_arg(args: &HashMap<String, Value>, name: &str) -> Result<i64> {
    args.get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument: {name}")))
}

/// Helper to extract a boolean argument with a default.
pub fn get_bool_arg(args: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
}
