//! In-memory collaborators for standalone deployments and tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::context::{Auth, Database, Identity, Storage};
use crate::error::{Error, Result};

/// In-memory database of canned result rows keyed by query string.
///
/// Counts every executed query, so tests can assert that an authorization
/// failure performed zero reads.
#[derive(Default)]
pub struct InMemoryDatabase {
    rows: RwLock<HashMap<String, Vec<Value>>>,
    query_count: AtomicU64,
}

impl InMemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed the rows returned for a query.
    pub async fn seed(&self, query: impl Into<String>, rows: Vec<Value>) {
        self.rows.write().await.insert(query.into(), rows);
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn execute_query(&self, query: &str, _params: &[Value]) -> Result<Vec<Value>> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .read()
            .await
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct InMemoryStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn upload_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.files
            .write()
            .await
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound(path.to_string()))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .files
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Auth collaborator with a fixed caller identity and token set.
pub struct StaticAuth {
    identity: Identity,
    valid_tokens: Vec<String>,
}

impl StaticAuth {
    pub fn new(identity: Identity) -> Arc<Self> {
        Arc::new(Self {
            identity,
            valid_tokens: Vec::new(),
        })
    }

    pub fn with_tokens(identity: Identity, valid_tokens: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            identity,
            valid_tokens,
        })
    }
}

#[async_trait]
impl Auth for StaticAuth {
    async fn get_current_user(&self) -> Result<Identity> {
        Ok(self.identity.clone())
    }

    async fn validate_token(&self, token: &str) -> Result<bool> {
        Ok(self.valid_tokens.iter().any(|t| t == token))
    }
}
