//! Sampling bridge: lets registered server-side code answer
//! `sampling/createMessage` by running a completion on the engine's behalf.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::ContentBlock;
use crate::error::{Error, Result};

/// A message in a sampling conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: String,
    pub content: ContentBlock,
}

/// Params of sampling/createMessage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

/// Result of sampling/createMessage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageResult {
    pub role: String,
    pub content: ContentBlock,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Handler answering completion requests.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult>;
}

/// Single-slot hook for completion requests; at most one handler per engine
/// instance.
pub struct SamplingBridge {
    handler: RwLock<Option<Arc<dyn SamplingHandler>>>,
}

impl SamplingBridge {
    pub fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }

    /// Install the handler, replacing any previous one.
    pub async fn register(&self, handler: Arc<dyn SamplingHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub async fn is_registered(&self) -> bool {
        self.handler.read().await.is_some()
    }

    /// Run a completion through the registered handler.
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        let handler = {
            let guard = self.handler.read().await;
            guard.clone().ok_or(Error::SamplingNotSupported)?
        };
        handler.create_message(params).await
    }
}

impl Default for SamplingBridge {
    fn default() -> Self {
        Self::new()
    }
}
