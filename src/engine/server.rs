//! The engine: message dispatch, capability negotiation, and session wiring.
//!
//! Every inbound request runs on its own task so one slow handler never
//! blocks unrelated requests; registry mutation is serialized behind the
//! registries' own locks.

use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::engine::logging::{LoggingBroadcaster, SetLevelParams};
use crate::engine::progress::ProgressTracker;
use crate::engine::prompts::PromptRegistry;
use crate::engine::protocol::*;
use crate::engine::resources::ResourceRegistry;
use crate::engine::sampling::{CreateMessageParams, SamplingBridge};
use crate::engine::session::{Outbound, SessionId, SessionManager, SessionState};
use crate::engine::tools::{error_result, ToolRegistry};
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// The protocol engine.
///
/// Owns all registries and session state; multiple independent instances can
/// coexist in one process.
pub struct Engine {
    info: Implementation,
    sessions: Arc<SessionManager>,
    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
    progress: ProgressTracker,
    logging: LoggingBroadcaster,
    sampling: SamplingBridge,
    metrics: Arc<Metrics>,
    active_requests: DashMap<(SessionId, RequestId), AbortHandle>,
}

enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl Engine {
    /// Create an engine advertising the given implementation info.
    pub fn new(info: Implementation) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new());
        Arc::new(Self {
            info,
            tools: ToolRegistry::new(sessions.clone()),
            resources: ResourceRegistry::new(sessions.clone()),
            prompts: PromptRegistry::new(sessions.clone()),
            progress: ProgressTracker::new(sessions.clone()),
            logging: LoggingBroadcaster::new(sessions.clone()),
            sampling: SamplingBridge::new(),
            metrics: Metrics::new(),
            active_requests: DashMap::new(),
            sessions,
        })
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn logging(&self) -> &LoggingBroadcaster {
        &self.logging
    }

    pub fn sampling(&self) -> &SamplingBridge {
        &self.sampling
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // ===== Session plumbing =====

    /// Open a session for a new transport connection.
    ///
    /// The transport drains the returned receiver onto the wire and calls
    /// [`Engine::disconnect`] when the connection closes.
    pub async fn connect(&self) -> (SessionId, tokio::sync::mpsc::Receiver<Outbound>) {
        let pair = self.sessions.open().await;
        self.metrics
            .set_active_sessions(self.sessions.count().await as u64);
        pair
    }

    /// Tear a session down: abort its in-flight requests and release every
    /// subscription and progress token it owns.
    pub async fn disconnect(&self, session_id: SessionId) {
        let stale: Vec<(SessionId, RequestId)> = self
            .active_requests
            .iter()
            .filter(|entry| entry.key().0 == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            if let Some((_, handle)) = self.active_requests.remove(&key) {
                handle.abort();
            }
        }

        self.resources.release_session(session_id).await;
        self.progress.release_session(session_id).await;
        self.sessions.close(session_id).await;
        self.metrics
            .set_active_sessions(self.sessions.count().await as u64);
    }

    /// Tear down every live session.
    pub async fn shutdown(&self) {
        for session_id in self.sessions.ids().await {
            self.disconnect(session_id).await;
        }
    }

    /// Capabilities as they would be advertised right now: each present only
    /// when at least one corresponding item is registered.
    pub async fn server_capabilities(&self) -> ServerCapabilities {
        let has_resources =
            self.resources.resource_count().await + self.resources.template_count().await > 0;
        ServerCapabilities {
            tools: (!self.tools.is_empty().await).then(|| ToolsCapability { list_changed: true }),
            resources: has_resources.then(|| ResourcesCapability {
                subscribe: true,
                list_changed: true,
            }),
            prompts: (!self.prompts.is_empty().await)
                .then(|| PromptsCapability { list_changed: true }),
            logging: (self.logging.handler_count().await > 0).then(LoggingCapability::default),
            sampling: self
                .sampling
                .is_registered()
                .await
                .then(SamplingCapability::default),
        }
    }

    // ===== Dispatch =====

    /// Entry point for a raw wire message from a transport.
    ///
    /// Requests are spawned onto their own tasks; notifications are handled
    /// inline and never produce a reply.
    pub async fn handle_message(self: Arc<Self>, session_id: SessionId, raw: &str) {
        match decode(raw) {
            Ok(Incoming::Request(request)) => self.spawn_request(session_id, request),
            Ok(Incoming::Notification(notification)) => {
                self.handle_notification(session_id, notification).await;
            }
            Err((id, e)) => {
                self.metrics.inc_failed();
                let response = JsonRpcResponse::error(id, rpc_error(&e));
                self.sessions
                    .send_to(session_id, Outbound::Response(response))
                    .await;
            }
        }
    }

    fn spawn_request(self: Arc<Self>, session_id: SessionId, request: JsonRpcRequest) {
        let request_id = request.id.clone();
        let key = (session_id, request_id.clone());

        let worker = tokio::spawn({
            let engine = Arc::clone(&self);
            async move { engine.dispatch_request(session_id, request).await }
        });
        self.active_requests.insert(key.clone(), worker.abort_handle());

        let engine = self;
        tokio::spawn(async move {
            let outcome = worker.await;
            engine.active_requests.remove(&key);
            match outcome {
                Ok(response) => {
                    engine
                        .sessions
                        .send_to(session_id, Outbound::Response(response))
                        .await;
                }
                Err(e) if e.is_cancelled() => {
                    debug!(session = %session_id, "request cancelled, suppressing response");
                }
                Err(e) => {
                    error!(session = %session_id, "request task panicked: {e}");
                    let response = JsonRpcResponse::error(
                        request_id,
                        rpc_error(&Error::Internal(e.to_string())),
                    );
                    engine
                        .sessions
                        .send_to(session_id, Outbound::Response(response))
                        .await;
                }
            }
        });
    }

    async fn dispatch_request(&self, session_id: SessionId, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(session = %session_id, method = %request.method, "dispatching request");
        self.metrics.inc_requests();

        let id = request.id.clone();
        match self.route(session_id, &request).await {
            Ok(value) => {
                self.metrics.inc_success();
                JsonRpcResponse::success(id, value)
            }
            Err(e) => {
                self.metrics.inc_failed();
                JsonRpcResponse::error(id, rpc_error(&e))
            }
        }
    }

    async fn route(&self, session_id: SessionId, request: &JsonRpcRequest) -> Result<Value> {
        let state = self
            .sessions
            .state(session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        match (state, request.method.as_str()) {
            (SessionState::Uninitialized, "initialize") => {}
            (_, "initialize") => {
                return Err(Error::InvalidRequest(
                    "initialize received on an already-initialized session".to_string(),
                ))
            }
            (SessionState::Uninitialized, method) => {
                return Err(Error::InvalidRequest(format!(
                    "method '{method}' requires an initialized session"
                )))
            }
            (_, "ping") => return Ok(json!({})),
            (SessionState::Operating, _) => {}
            (_, method) => {
                return Err(Error::InvalidRequest(format!(
                    "method '{method}' requires an initialized session"
                )))
            }
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(session_id, request.params.clone()).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(session_id, request.params.clone()).await,
            "resources/list" => self.handle_list_resources().await,
            "resources/read" => self.handle_read_resource(request.params.clone()).await,
            "resources/subscribe" => {
                self.handle_subscription(session_id, request.params.clone(), true).await
            }
            "resources/unsubscribe" => {
                self.handle_subscription(session_id, request.params.clone(), false).await
            }
            "prompts/list" => self.handle_list_prompts().await,
            "prompts/get" => self.handle_get_prompt(request.params.clone()).await,
            "sampling/createMessage" => self.handle_create_message(request.params.clone()).await,
            "logging/setLevel" => self.handle_set_level(request.params.clone()).await,
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    /// Handle a notification. Failures are logged, never surfaced.
    pub async fn handle_notification(&self, session_id: SessionId, notification: JsonRpcNotification) {
        debug!(session = %session_id, method = %notification.method, "handling notification");

        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                if let Err(e) = self.sessions.mark_operating(session_id).await {
                    warn!(session = %session_id, "ignoring initialized notification: {e}");
                }
            }
            "notifications/cancelled" => {
                let Some(params) = notification.params else {
                    warn!(session = %session_id, "cancelled notification without params");
                    return;
                };
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(cancel) => self.cancel_request(session_id, &cancel.request_id),
                    Err(e) => warn!(session = %session_id, "malformed cancelled notification: {e}"),
                }
            }
            other => {
                debug!(session = %session_id, "unknown notification: {other}");
            }
        }
    }

    /// Best-effort cancellation of an in-flight request.
    pub fn cancel_request(&self, session_id: SessionId, request_id: &RequestId) {
        if let Some((_, handle)) = self
            .active_requests
            .remove(&(session_id, request_id.clone()))
        {
            handle.abort();
            debug!(session = %session_id, id = ?request_id, "aborted in-flight request");
        } else {
            debug!(session = %session_id, id = ?request_id, "cancellation for unknown request");
        }
    }

    /// Number of requests currently in flight (test/introspection aid).
    pub fn in_flight(&self) -> usize {
        self.active_requests.len()
    }

    // ===== Request handlers =====

    async fn handle_initialize(&self, session_id: SessionId, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = parse_params(params)?;

        let negotiated = if params.protocol_version == PROTOCOL_VERSION {
            params.protocol_version.clone()
        } else {
            PROTOCOL_VERSION.to_string()
        };

        self.sessions
            .begin_initialize(
                session_id,
                params.client_info,
                params.capabilities,
                negotiated.clone(),
            )
            .await?;

        let result = InitializeResult {
            protocol_version: negotiated,
            capabilities: self.server_capabilities().await,
            server_info: self.info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_tools(&self) -> Result<Value> {
        let result = ListToolsResult {
            tools: self.tools.list().await,
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_call_tool(&self, session_id: SessionId, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = parse_params(params)?;

        // Unknown tool is a dispatch-level error: the call never reached
        // tenant logic, so the caller gets a protocol error, not a result.
        let handler = self.tools.get(&params.name).await?;
        self.metrics.inc_tool_calls();

        if let Some(token) = params.meta.as_ref().and_then(|m| m.progress_token.clone()) {
            self.progress.adopt_token(token, session_id, None).await;
        }

        // A failing or panicking handler is converted into an error-flagged
        // result so the calling agent can observe the failure as data.
        let result = match AssertUnwindSafe(handler.execute(params.arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => error_result(format!("tool execution failed: {e}")),
            Err(payload) => {
                error!(tool = %params.name, "tool handler panicked");
                error_result(format!(
                    "tool handler panicked: {}",
                    panic_message(payload.as_ref())
                ))
            }
        };

        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_resources(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.resources.list().await)?)
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value> {
        let params: ReadResourceParams = parse_params(params)?;
        let result = self.resources.read(&params.uri).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_subscription(
        &self,
        session_id: SessionId,
        params: Option<Value>,
        subscribe: bool,
    ) -> Result<Value> {
        let params: SubscribeParams = parse_params(params)?;
        if subscribe {
            self.resources.subscribe(&params.uri, session_id).await?;
        } else {
            self.resources.unsubscribe(&params.uri, session_id).await;
        }
        Ok(json!({}))
    }

    async fn handle_list_prompts(&self) -> Result<Value> {
        let result = ListPromptsResult {
            prompts: self.prompts.list().await,
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value> {
        let params: GetPromptParams = parse_params(params)?;
        let result = self.prompts.get(&params.name, params.arguments).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_create_message(&self, params: Option<Value>) -> Result<Value> {
        let params: CreateMessageParams = parse_params(params)?;
        let result = self.sampling.create_message(params).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_set_level(&self, params: Option<Value>) -> Result<Value> {
        let params: SetLevelParams = parse_params(params)?;
        self.logging.set_level(params.level).await;
        Ok(json!({}))
    }
}

fn decode(raw: &str) -> std::result::Result<Incoming, (RequestId, Error)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| (RequestId::Null, Error::Parse(e.to_string())))?;

    let id = value
        .get("id")
        .cloned()
        .and_then(|v| serde_json::from_value::<RequestId>(v).ok());

    if value.get("method").and_then(Value::as_str).is_none() {
        return Err((
            id.unwrap_or(RequestId::Null),
            Error::InvalidRequest("envelope has no method".to_string()),
        ));
    }

    match id {
        Some(id) if id != RequestId::Null => serde_json::from_value::<JsonRpcRequest>(value)
            .map(Incoming::Request)
            .map_err(|e| (id, Error::InvalidRequest(e.to_string()))),
        _ => serde_json::from_value::<JsonRpcNotification>(value)
            .map(Incoming::Notification)
            .map_err(|e| (RequestId::Null, Error::InvalidRequest(e.to_string()))),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = params.ok_or_else(|| Error::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn rpc_error(e: &Error) -> JsonRpcError {
    JsonRpcError {
        code: e.code(),
        message: e.to_string(),
        data: None,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tools::{success_result, tool_fn, get_string_arg};
    use crate::engine::protocol::{Resource, ResourceContents, Tool};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        engine: Arc<Engine>,
        session: SessionId,
        rx: mpsc::Receiver<Outbound>,
        next_id: i64,
    }

    impl Harness {
        async fn new() -> Self {
            let engine = Engine::new(Implementation {
                name: "tenant-engine".to_string(),
                version: "1.3.0".to_string(),
            });
            let (session, rx) = engine.connect().await;
            Self {
                engine,
                session,
                rx,
                next_id: 0,
            }
        }

        async fn request(&mut self, method: &str, params: Value) -> JsonRpcResponse {
            self.next_id += 1;
            let raw = json!({
                "jsonrpc": "2.0",
                "id": self.next_id,
                "method": method,
                "params": params
            })
            .to_string();
            self.engine.clone().handle_message(self.session, &raw).await;
            self.next_response().await
        }

        async fn notify(&mut self, method: &str, params: Value) {
            let raw = json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params
            })
            .to_string();
            self.engine.clone().handle_message(self.session, &raw).await;
        }

        async fn next_response(&mut self) -> JsonRpcResponse {
            loop {
                let msg = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                    .await
                    .expect("timed out waiting for response")
                    .expect("session channel closed");
                match msg {
                    Outbound::Response(response) => return response,
                    Outbound::Notification(_) => continue,
                }
            }
        }

        async fn handshake(&mut self) {
            let response = self
                .request(
                    "initialize",
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {"name": "test-client", "version": "1.0.0"}
                    }),
                )
                .await;
            assert!(response.error.is_none(), "handshake failed: {response:?}");
            self.notify("initialized", json!({})).await;
            // The state transition runs inline; nothing further to await.
        }
    }

    fn echo_tool() -> impl crate::engine::tools::ToolHandler {
        tool_fn(
            Tool {
                name: "echo".to_string(),
                description: "Echo the input back".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                }),
            },
            |args: HashMap<String, Value>| async move {
                let text = get_string_arg(&args, "text")?;
                Ok(success_result(text))
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let mut h = Harness::new().await;
        h.engine.tools().register(echo_tool()).await;

        let response = h
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "roots": { "listChanged": true } },
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }),
            )
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "tenant-engine");
        assert!(result["capabilities"]["tools"].is_object());
        // Nothing else is registered, so nothing else is advertised.
        assert!(result["capabilities"].get("resources").is_none());
        assert!(result["capabilities"].get("prompts").is_none());
        assert!(result["capabilities"].get("sampling").is_none());
    }

    #[tokio::test]
    async fn test_second_initialize_rejected() {
        let mut h = Harness::new().await;
        h.handshake().await;

        let response = h
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }),
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_request_before_initialize_rejected() {
        let mut h = Harness::new().await;
        h.engine.tools().register(echo_tool()).await;

        let response = h
            .request("tools/call", json!({"name": "echo", "arguments": {"text": "hi"}}))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_ping_gated_on_handshake() {
        let mut h = Harness::new().await;
        let response = h.request("ping", json!({})).await;
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_REQUEST);

        // Once the handshake has started, ping is serviceable.
        h.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            }),
        )
        .await;
        let response = h.request("ping", json!({})).await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut h = Harness::new().await;
        h.handshake().await;

        let response = h.request("tools/unknown", json!({})).await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_request_id_echoed_verbatim() {
        let mut h = Harness::new().await;
        h.handshake().await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": "string-id-7",
            "method": "tools/list",
            "params": {}
        })
        .to_string();
        h.engine.clone().handle_message(h.session, &raw).await;
        let response = h.next_response().await;
        assert_eq!(response.id, RequestId::String("string-id-7".to_string()));
    }

    #[tokio::test]
    async fn test_echo_tool_call() {
        let mut h = Harness::new().await;
        h.engine.tools().register(echo_tool()).await;
        h.handshake().await;

        let response = h
            .request("tools/call", json!({"name": "echo", "arguments": {"text": "hi"}}))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_dispatch_error() {
        let mut h = Harness::new().await;
        h.handshake().await;

        let response = h
            .request("tools/call", json!({"name": "missing", "arguments": {}}))
            .await;
        assert_eq!(response.error.unwrap().code, error_codes::TOOL_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failing_handler_becomes_error_result() {
        let mut h = Harness::new().await;
        h.engine
            .tools()
            .register(tool_fn(
                Tool {
                    name: "flaky".to_string(),
                    description: "Always fails".to_string(),
                    input_schema: json!({"type": "object"}),
                },
                |_| async { Err(Error::ToolExecutionFailed("backend unavailable".into())) },
            ))
            .await;
        h.handshake().await;

        let response = h
            .request("tools/call", json!({"name": "flaky", "arguments": {}}))
            .await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("backend unavailable"));
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl crate::engine::tools::ToolHandler for PanickingTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "bomb".to_string(),
                description: "Panics".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            _arguments: HashMap<String, Value>,
        ) -> Result<crate::engine::protocol::ToolResult> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_engine() {
        let mut h = Harness::new().await;
        h.engine.tools().register(echo_tool()).await;
        h.engine.tools().register(PanickingTool).await;
        h.handshake().await;

        let response = h
            .request("tools/call", json!({"name": "bomb", "arguments": {}}))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("boom"));

        // The engine still serves subsequent requests on the same session.
        let response = h.request("tools/list", json!({})).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn test_tools_list_roundtrip() {
        let mut h = Harness::new().await;
        h.engine.tools().register(echo_tool()).await;
        h.handshake().await;

        let response = h.request("tools/list", json!({})).await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["description"], "Echo the input back");
        assert_eq!(
            tools[0]["inputSchema"]["properties"]["text"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn test_resource_read_and_subscribe_flow() {
        let mut h = Harness::new().await;
        h.engine
            .resources()
            .register_static(
                Resource {
                    uri: "config://tenant".to_string(),
                    name: "Tenant configuration".to_string(),
                    description: None,
                    mime_type: Some("application/json".to_string()),
                },
                ResourceContents {
                    uri: "config://tenant".to_string(),
                    mime_type: Some("application/json".to_string()),
                    text: Some(r#"{"plan":"enterprise"}"#.to_string()),
                    blob: None,
                },
            )
            .await;
        h.handshake().await;

        let response = h
            .request("resources/read", json!({"uri": "config://tenant"}))
            .await;
        let contents = &response.result.unwrap()["contents"][0];
        assert_eq!(contents["text"], r#"{"plan":"enterprise"}"#);

        let response = h
            .request("resources/subscribe", json!({"uri": "config://tenant"}))
            .await;
        assert!(response.error.is_none());

        let notified = h.engine.resources().notify_updated("config://tenant").await;
        assert_eq!(notified, 1);

        let msg = h.rx.recv().await.unwrap();
        match msg {
            Outbound::Notification(n) => {
                assert_eq!(n.method, "notifications/resources/updated");
                assert_eq!(n.params.unwrap()["uri"], "config://tenant");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sampling_without_handler() {
        let mut h = Harness::new().await;
        h.handshake().await;

        let response = h
            .request(
                "sampling/createMessage",
                json!({"messages": [{"role": "user", "content": {"type": "text", "text": "hi"}}]}),
            )
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::SAMPLING_NOT_SUPPORTED);
        assert!(error.message.contains("Sampling not supported"));
    }

    #[tokio::test]
    async fn test_cancellation_suppresses_response() {
        let mut h = Harness::new().await;
        h.engine
            .tools()
            .register(tool_fn(
                Tool {
                    name: "slow".to_string(),
                    description: "Sleeps".to_string(),
                    input_schema: json!({"type": "object"}),
                },
                |_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(success_result("done"))
                },
            ))
            .await;
        h.handshake().await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": 99,
            "method": "tools/call",
            "params": {"name": "slow", "arguments": {}}
        })
        .to_string();
        h.engine.clone().handle_message(h.session, &raw).await;

        // Let the request task start before cancelling it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.engine.in_flight(), 1);

        h.notify("notifications/cancelled", json!({"requestId": 99})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.engine.in_flight(), 0);

        let outcome = tokio::time::timeout(Duration::from_millis(200), h.rx.recv()).await;
        assert!(outcome.is_err(), "cancelled request must not produce a response");
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let mut h = Harness::new().await;
        h.engine.clone().handle_message(h.session, "{not json").await;

        let response = h.next_response().await;
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::PARSE_ERROR);
        assert_eq!(response.id, RequestId::Null);
    }

    #[tokio::test]
    async fn test_disconnect_releases_state() {
        let mut h = Harness::new().await;
        h.engine
            .resources()
            .register_static(
                Resource {
                    uri: "config://tenant".to_string(),
                    name: "Tenant configuration".to_string(),
                    description: None,
                    mime_type: None,
                },
                ResourceContents {
                    uri: "config://tenant".to_string(),
                    mime_type: None,
                    text: Some("{}".to_string()),
                    blob: None,
                },
            )
            .await;
        h.handshake().await;

        h.request("resources/subscribe", json!({"uri": "config://tenant"}))
            .await;
        let token = h.engine.progress().create_token(h.session, Some(10)).await;
        assert!(h.engine.progress().is_active(&token).await);

        h.engine.disconnect(h.session).await;
        assert!(!h.engine.progress().is_active(&token).await);
        assert_eq!(h.engine.resources().notify_updated("config://tenant").await, 0);
        assert_eq!(h.engine.sessions().count().await, 0);
    }

    #[tokio::test]
    async fn test_capabilities_track_registrations() {
        let h = Harness::new().await;
        let caps = h.engine.server_capabilities().await;
        assert!(caps.tools.is_none());
        assert!(caps.resources.is_none());
        assert!(caps.logging.is_none());

        h.engine.tools().register(echo_tool()).await;
        h.engine.logging().add_handler(Box::new(|_, _, _| {})).await;

        let caps = h.engine.server_capabilities().await;
        assert!(caps.tools.is_some());
        assert!(caps.logging.is_some());
        assert!(caps.resources.is_none());
    }
}
