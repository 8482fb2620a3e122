//! Tenant isolation layer.
//!
//! Binds engine capabilities to per-tenant collaborators. Every wrapped
//! handler receives an explicit [`context::TenantContext`]; tenant identity
//! is never ambient.

pub mod adapter;
pub mod context;
pub mod memory;

pub use adapter::TenantAdapter;
pub use context::{Auth, Database, Identity, Storage, TenantContext};
