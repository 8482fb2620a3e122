//! Prompt registry with required-argument validation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::{GetPromptResult, JsonRpcNotification, Prompt};
use crate::engine::session::SessionManager;
use crate::error::{Error, Result};

/// Handler producing the message sequence for a prompt.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn resolve(&self, arguments: HashMap<String, String>) -> Result<GetPromptResult>;
}

/// Adapter turning a closure into a [`PromptHandler`].
pub struct FnPrompt<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> PromptHandler for FnPrompt<F>
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<GetPromptResult>> + Send,
{
    async fn resolve(&self, arguments: HashMap<String, String>) -> Result<GetPromptResult> {
        (self.f)(arguments).await
    }
}

/// Build a prompt handler from a closure.
pub fn prompt_fn<F, Fut>(f: F) -> FnPrompt<F>
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<GetPromptResult>> + Send,
{
    FnPrompt { f }
}

/// Per-instance registry of prompt definitions and handlers.
pub struct PromptRegistry {
    sessions: Arc<SessionManager>,
    prompts: RwLock<HashMap<String, (Prompt, Arc<dyn PromptHandler>)>>,
}

impl PromptRegistry {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            prompts: RwLock::new(HashMap::new()),
        }
    }

    /// Register a prompt. Upserts by name and emits
    /// `notifications/prompts/list_changed`.
    pub async fn register(&self, prompt: Prompt, handler: Arc<dyn PromptHandler>) {
        self.prompts
            .write()
            .await
            .insert(prompt.name.clone(), (prompt, handler));
        self.notify_list_changed().await;
    }

    /// Remove a prompt by name. Returns false if it was not registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.prompts.write().await.remove(name).is_some();
        if removed {
            self.notify_list_changed().await;
        }
        removed
    }

    /// List all prompt definitions, sorted by name.
    pub async fn list(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .read()
            .await
            .values()
            .map(|(p, _)| p.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub async fn len(&self) -> usize {
        self.prompts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prompts.read().await.is_empty()
    }

    /// Resolve a prompt by name.
    ///
    /// All arguments declared `required` must be present, otherwise the call
    /// fails with `InvalidParams` before the handler runs.
    pub async fn get(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        let (definition, handler) = {
            let prompts = self.prompts.read().await;
            let (definition, handler) = prompts
                .get(name)
                .ok_or_else(|| Error::PromptNotFound(name.to_string()))?;
            (definition.clone(), handler.clone())
        };

        let missing: Vec<&str> = definition
            .arguments
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidParams(format!(
                "Missing required arguments: {}",
                missing.join(", ")
            )));
        }

        handler.resolve(arguments).await
    }

    async fn notify_list_changed(&self) {
        self.sessions
            .broadcast_operating(JsonRpcNotification::new(
                "notifications/prompts/list_changed",
                None,
            ))
            .await;
    }
}
