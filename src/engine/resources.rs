//! Resource registry, templates, and subscription bookkeeping.

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::{
    JsonRpcNotification, ListResourcesResult, ReadResourceResult, Resource, ResourceContents,
    ResourceTemplate,
};
use crate::engine::session::{Outbound, SessionId, SessionManager};
use crate::error::{Error, Result};

/// Handler producing the contents of a resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource identified by `uri`.
    ///
    /// For template-backed handlers the uri is the concrete uri requested by
    /// the client, not the template.
    async fn read(&self, uri: &str) -> Result<ResourceContents>;
}

/// Adapter turning a closure into a [`ResourceHandler`].
pub struct FnResource<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ResourceHandler for FnResource<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceContents>> + Send,
{
    async fn read(&self, uri: &str) -> Result<ResourceContents> {
        (self.f)(uri.to_string()).await
    }
}

/// Build a resource handler from a closure.
pub fn resource_fn<F, Fut>(f: F) -> FnResource<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceContents>> + Send,
{
    FnResource { f }
}

struct ResourceEntry {
    definition: Resource,
    handler: Option<Arc<dyn ResourceHandler>>,
}

struct TemplateEntry {
    definition: ResourceTemplate,
    handler: Arc<dyn ResourceHandler>,
}

/// Per-instance registry of resources and resource templates, plus the
/// uri -> session subscription table.
pub struct ResourceRegistry {
    sessions: Arc<SessionManager>,
    resources: RwLock<HashMap<String, ResourceEntry>>,
    templates: RwLock<HashMap<String, TemplateEntry>>,
    subscriptions: RwLock<HashMap<String, HashSet<SessionId>>>,
}

impl ResourceRegistry {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            resources: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a concrete resource. Upserts by uri and emits
    /// `notifications/resources/list_changed`.
    ///
    /// A resource registered without a handler lists normally and reads as an
    /// empty body with its declared mime type.
    pub async fn register(&self, definition: Resource, handler: Option<Arc<dyn ResourceHandler>>) {
        let uri = definition.uri.clone();
        self.resources
            .write()
            .await
            .insert(uri, ResourceEntry { definition, handler });
        self.notify_list_changed().await;
    }

    /// Register a static resource whose contents never change.
    pub async fn register_static(&self, definition: Resource, contents: ResourceContents) {
        let contents = Arc::new(contents);
        let handler = resource_fn(move |_uri| {
            let contents = contents.clone();
            async move { Ok((*contents).clone()) }
        });
        self.register(definition, Some(Arc::new(handler))).await;
    }

    /// Register a resource template. Upserts by uri template and emits
    /// `notifications/resources/list_changed`.
    pub async fn register_template(
        &self,
        definition: ResourceTemplate,
        handler: Arc<dyn ResourceHandler>,
    ) {
        let key = definition.uri_template.clone();
        self.templates
            .write()
            .await
            .insert(key, TemplateEntry { definition, handler });
        self.notify_list_changed().await;
    }

    /// Remove a resource by uri, dropping any subscriptions to it.
    /// Returns false if it was not registered.
    pub async fn unregister(&self, uri: &str) -> bool {
        let removed = self.resources.write().await.remove(uri).is_some();
        if removed {
            self.subscriptions.write().await.remove(uri);
            self.notify_list_changed().await;
        }
        removed
    }

    /// List registered resources and templates, sorted for stable output.
    pub async fn list(&self) -> ListResourcesResult {
        let mut resources: Vec<Resource> = self
            .resources
            .read()
            .await
            .values()
            .map(|e| e.definition.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));

        let mut resource_templates: Vec<ResourceTemplate> = self
            .templates
            .read()
            .await
            .values()
            .map(|e| e.definition.clone())
            .collect();
        resource_templates.sort_by(|a, b| a.uri_template.cmp(&b.uri_template));

        ListResourcesResult {
            resources,
            resource_templates,
        }
    }

    /// Read a resource by uri.
    ///
    /// Concrete registrations win over templates; a uri matching neither is
    /// a `ResourceNotFound` error.
    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult> {
        let uri = percent_decode_str(uri).decode_utf8_lossy().into_owned();

        let concrete = {
            let resources = self.resources.read().await;
            resources.get(&uri).map(|entry| {
                (entry.handler.clone(), entry.definition.mime_type.clone())
            })
        };

        if let Some((handler, mime_type)) = concrete {
            let contents = match handler {
                Some(handler) => handler.read(&uri).await?,
                None => ResourceContents {
                    uri: uri.clone(),
                    mime_type,
                    text: Some(String::new()),
                    blob: None,
                },
            };
            return Ok(ReadResourceResult {
                contents: vec![contents],
            });
        }

        if let Some(handler) = self.matching_template_handler(&uri).await {
            let contents = handler.read(&uri).await?;
            return Ok(ReadResourceResult {
                contents: vec![contents],
            });
        }

        Err(Error::ResourceNotFound(uri))
    }

    /// Subscribe a session to update notifications for a uri. Idempotent.
    ///
    /// The uri must name a registered resource or match a registered
    /// template.
    pub async fn subscribe(&self, uri: &str, session_id: SessionId) -> Result<()> {
        if !self.is_known_uri(uri).await {
            return Err(Error::ResourceNotFound(uri.to_string()));
        }
        self.subscriptions
            .write()
            .await
            .entry(uri.to_string())
            .or_default()
            .insert(session_id);
        Ok(())
    }

    /// Remove a session's subscription for a uri. Idempotent.
    pub async fn unsubscribe(&self, uri: &str, session_id: SessionId) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(sessions) = subscriptions.get_mut(uri) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                subscriptions.remove(uri);
            }
        }
    }

    /// Emit `notifications/resources/updated` to exactly the sessions
    /// subscribed to `uri`. Returns the number of sessions notified.
    pub async fn notify_updated(&self, uri: &str) -> usize {
        let subscribers: Vec<SessionId> = {
            let subscriptions = self.subscriptions.read().await;
            match subscriptions.get(uri) {
                Some(sessions) => sessions.iter().copied().collect(),
                None => return 0,
            }
        };

        let notification = JsonRpcNotification::new(
            "notifications/resources/updated",
            Some(json!({ "uri": uri })),
        );

        let mut notified = 0;
        for session_id in subscribers {
            if self
                .sessions
                .send_to(session_id, Outbound::Notification(notification.clone()))
                .await
            {
                notified += 1;
            }
        }
        notified
    }

    /// Drop every subscription held by a departing session.
    pub async fn release_session(&self, session_id: SessionId) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|_, sessions| {
            sessions.remove(&session_id);
            !sessions.is_empty()
        });
    }

    /// Number of subscriptions held by a session (test/introspection aid).
    pub async fn subscription_count(&self, session_id: SessionId) -> usize {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|sessions| sessions.contains(&session_id))
            .count()
    }

    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn template_count(&self) -> usize {
        self.templates.read().await.len()
    }

    async fn is_known_uri(&self, uri: &str) -> bool {
        if self.resources.read().await.contains_key(uri) {
            return true;
        }
        self.matching_template_handler(uri).await.is_some()
    }

    async fn matching_template_handler(&self, uri: &str) -> Option<Arc<dyn ResourceHandler>> {
        let templates = self.templates.read().await;
        let mut keys: Vec<&String> = templates.keys().collect();
        keys.sort();
        for key in keys {
            if template_matches(key, uri) {
                return Some(templates[key].handler.clone());
            }
        }
        None
    }

    async fn notify_list_changed(&self) {
        self.sessions
            .broadcast_operating(JsonRpcNotification::new(
                "notifications/resources/list_changed",
                None,
            ))
            .await;
    }
}

/// Match a concrete uri against a `{variable}`-style uri template.
///
/// Variables match one or more characters; literal segments must appear in
/// order.
pub(crate) fn template_matches(template: &str, uri: &str) -> bool {
    let mut chunks = template.split('{');
    let head = chunks.next().unwrap_or("");
    if !uri.starts_with(head) {
        return false;
    }
    let mut rest = &uri[head.len()..];
    let mut trailing_variable = false;

    for chunk in chunks {
        let Some(close) = chunk.find('}') else {
            // Malformed template, unmatched brace
            return false;
        };
        let literal = &chunk[close + 1..];
        if literal.is_empty() {
            trailing_variable = true;
            continue;
        }
        trailing_variable = false;
        match rest.find(literal) {
            Some(pos) if pos > 0 => rest = &rest[pos + literal.len()..],
            _ => return false,
        }
    }

    if trailing_variable {
        !rest.is_empty()
    } else {
        rest.is_empty()
    }
}
