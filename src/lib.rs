//! Tenant Engine - Capability-Negotiated Multi-Tenant RPC Server
//!
//! A protocol engine that exposes callable tools, readable/subscribable
//! resources, and parametrized prompts to remote clients over pluggable
//! transports, with per-tenant isolation of database, storage, and auth
//! collaborators.
//!
//! # Architecture
//!
//! The crate is organized in three layers:
//!
//! 1. **Engine Layer** (`engine`) - Protocol envelopes, message dispatch,
//!    capability negotiation, registries, subscription/progress/logging
//!    bookkeeping, and the transport abstraction
//! 2. **Tenant Layer** (`tenant`) - Adapter binding registered capabilities
//!    to tenant-scoped collaborators with explicit authorization checks
//! 3. **Transports** - Line-delimited stdio (`engine::transport`) and
//!    WebSocket (`ws`), mountable simultaneously on one engine
//!
//! # Features
//!
//! - **Capability negotiation**: `initialize` handshake advertising only the
//!   capabilities that have registered items
//! - **Bidirectional notifications**: list-changed, resource-updated,
//!   progress, and log message fan-out independent of request/response pairs
//! - **Tenant isolation**: every wrapped handler receives an explicit tenant
//!   context; no ambient state
//! - **Backpressure**: per-tenant in-flight call limits

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod tenant;
pub mod ws;

pub use engine::server::Engine;
pub use error::{Error, Result};

/// Server version advertised during the `initialize` handshake.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name advertised during the `initialize` handshake.
pub const SERVER_NAME: &str = "tenant-engine";
