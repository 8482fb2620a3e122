//! Tenant-scoped collaborator interfaces.
//!
//! The engine treats these as opaque, already tenant-scoped services owned
//! by the surrounding platform; it never assumes their internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Tenant-scoped database collaborator.
#[async_trait]
pub trait Database: Send + Sync {
    async fn execute_query(&self, query: &str, params: &[Value]) -> Result<Vec<Value>>;
}

/// Tenant-scoped object storage collaborator.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload_file(&self, path: &str, contents: &[u8]) -> Result<()>;
    async fn download_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Tenant-scoped auth collaborator.
#[async_trait]
pub trait Auth: Send + Sync {
    async fn get_current_user(&self) -> Result<Identity>;
    async fn validate_token(&self, token: &str) -> Result<bool>;
}

/// Caller identity resolved by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}

/// Everything a handler needs to act on behalf of one tenant.
///
/// Passed explicitly into every wrapped invocation.
pub struct TenantContext {
    pub tenant_id: String,
    pub database: Arc<dyn Database>,
    pub storage: Arc<dyn Storage>,
    pub auth: Arc<dyn Auth>,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<String>,
        database: Arc<dyn Database>,
        storage: Arc<dyn Storage>,
        auth: Arc<dyn Auth>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tenant_id: tenant_id.into(),
            database,
            storage,
            auth,
        })
    }
}
