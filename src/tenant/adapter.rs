//! Binds engine capabilities to one tenant's collaborators.
//!
//! Every handler registered through the adapter receives the tenant context
//! as an explicit argument and runs under the tenant's in-flight limit.
//! Privileged tools check the caller's identity before touching any tenant
//! data; an authorization failure is returned as an error-flagged tool
//! result so calling agents can present it to end users.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::context::TenantContext;
use crate::engine::prompts::PromptHandler;
use crate::engine::protocol::{
    GetPromptResult, Prompt, Resource, ResourceContents, Tool, ToolResult,
};
use crate::engine::resources::ResourceHandler;
use crate::engine::server::Engine;
use crate::engine::tools::{error_result, ToolHandler};
use crate::error::{Error, Result};

/// Registers tenant-scoped capabilities on an engine.
pub struct TenantAdapter {
    context: Arc<TenantContext>,
    limiter: Arc<Semaphore>,
}

impl TenantAdapter {
    /// Bind an adapter to a tenant context with the given in-flight call
    /// limit.
    pub fn new(context: Arc<TenantContext>, max_in_flight: usize) -> Self {
        Self {
            context,
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn context(&self) -> Arc<TenantContext> {
        self.context.clone()
    }

    /// Permits currently available under the tenant's in-flight limit.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Register a tool whose handler receives this tenant's context.
    pub async fn register_tool<F, Fut>(&self, engine: &Engine, definition: Tool, f: F)
    where
        F: Fn(Arc<TenantContext>, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        engine
            .tools()
            .register(self.wrap_tool(definition, f, false))
            .await;
    }

    /// Register a tool requiring the admin role.
    ///
    /// The authorization check runs before the handler, so a denied call
    /// performs no tenant data access at all.
    pub async fn register_admin_tool<F, Fut>(&self, engine: &Engine, definition: Tool, f: F)
    where
        F: Fn(Arc<TenantContext>, HashMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        engine
            .tools()
            .register(self.wrap_tool(definition, f, true))
            .await;
    }

    /// Register a resource whose handler receives this tenant's context.
    pub async fn register_resource<F, Fut>(&self, engine: &Engine, definition: Resource, f: F)
    where
        F: Fn(Arc<TenantContext>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceContents>> + Send + 'static,
    {
        let handler = TenantResource {
            context: self.context.clone(),
            limiter: self.limiter.clone(),
            f,
        };
        engine
            .resources()
            .register(definition, Some(Arc::new(handler)))
            .await;
    }

    /// Register a prompt whose handler receives this tenant's context.
    pub async fn register_prompt<F, Fut>(&self, engine: &Engine, definition: Prompt, f: F)
    where
        F: Fn(Arc<TenantContext>, HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
    {
        let handler = TenantPrompt {
            context: self.context.clone(),
            limiter: self.limiter.clone(),
            f,
        };
        engine.prompts().register(definition, Arc::new(handler)).await;
    }

    fn wrap_tool<F, Fut>(&self, definition: Tool, f: F, require_admin: bool) -> TenantTool<F>
    where
        F: Fn(Arc<TenantContext>, HashMap<String, Value>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<ToolResult>> + Send,
    {
        TenantTool {
            definition,
            context: self.context.clone(),
            limiter: self.limiter.clone(),
            require_admin,
            f,
        }
    }
}

struct TenantTool<F> {
    definition: Tool,
    context: Arc<TenantContext>,
    limiter: Arc<Semaphore>,
    require_admin: bool,
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for TenantTool<F>
where
    F: Fn(Arc<TenantContext>, HashMap<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolResult>> + Send,
{
    fn definition(&self) -> Tool {
        self.definition.clone()
    }

    async fn execute(&self, arguments: HashMap<String, Value>) -> Result<ToolResult> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::Internal("tenant call limiter closed".to_string()))?;

        if self.require_admin {
            match self.context.auth.get_current_user().await {
                Ok(identity) if identity.is_admin() => {}
                Ok(identity) => {
                    return Ok(error_result(format!(
                        "permission denied: user '{}' lacks the admin role",
                        identity.user_id
                    )))
                }
                Err(e) => return Ok(error_result(format!("permission denied: {e}"))),
            }
        }

        (self.f)(self.context.clone(), arguments).await
    }
}

struct TenantResource<F> {
    context: Arc<TenantContext>,
    limiter: Arc<Semaphore>,
    f: F,
}

#[async_trait]
impl<F, Fut> ResourceHandler for TenantResource<F>
where
    F: Fn(Arc<TenantContext>, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceContents>> + Send,
{
    async fn read(&self, uri: &str) -> Result<ResourceContents> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::Internal("tenant call limiter closed".to_string()))?;
        (self.f)(self.context.clone(), uri.to_string()).await
    }
}

struct TenantPrompt<F> {
    context: Arc<TenantContext>,
    limiter: Arc<Semaphore>,
    f: F,
}

#[async_trait]
impl<F, Fut> PromptHandler for TenantPrompt<F>
where
    F: Fn(Arc<TenantContext>, HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<GetPromptResult>> + Send,
{
    async fn resolve(&self, arguments: HashMap<String, String>) -> Result<GetPromptResult> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| Error::Internal("tenant call limiter closed".to_string()))?;
        (self.f)(self.context.clone(), arguments).await
    }
}
