//! Configuration management for the Tenant Engine.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Command-line arguments for the Tenant Engine server.
#[derive(Parser, Debug, Clone)]
#[command(name = "tenant-engine")]
#[command(author = "Tenant Engine Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability-negotiated multi-tenant RPC engine server")]
pub struct Args {
    /// Transport mode: stdio or ws
    #[arg(short, long, default_value = "stdio", env = "TENANT_ENGINE_TRANSPORT")]
    pub transport: TransportMode,

    /// WebSocket port (only for ws transport)
    #[arg(short, long, default_value = "7700", env = "TENANT_ENGINE_PORT")]
    pub port: u16,

    /// Enable debug logging
    #[arg(short, long, env = "TENANT_ENGINE_DEBUG")]
    pub debug: bool,

    /// Path to the tenant manifest (YAML)
    #[arg(long, env = "TENANT_ENGINE_TENANTS")]
    pub tenants: Option<PathBuf>,

    /// Maximum concurrent in-flight calls per tenant
    #[arg(long, default_value = "8", env = "TENANT_ENGINE_MAX_IN_FLIGHT")]
    pub max_in_flight: usize,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Ws,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport mode
    pub transport: TransportMode,
    /// WebSocket port
    pub port: u16,
    /// Debug mode
    pub debug: bool,
    /// Tenant manifest path
    pub tenants: Option<PathBuf>,
    /// Maximum concurrent in-flight calls per tenant
    pub max_in_flight: usize,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            transport: args.transport,
            port: args.port,
            debug: args.debug,
            tenants: args.tenants,
            max_in_flight: args.max_in_flight,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportMode::Stdio,
            port: 7700,
            debug: false,
            tenants: None,
            max_in_flight: 8,
        }
    }
}

/// Declarative list of tenants served by one engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantManifest {
    pub tenants: Vec<TenantEntry>,
}

/// One tenant declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantEntry {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Users granted the admin role for this tenant.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

impl TenantManifest {
    /// Load a manifest from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// A single-tenant manifest used when no file is configured.
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            tenants: vec![TenantEntry {
                id: id.into(),
                display_name: None,
                admin_users: Vec::new(),
            }],
        }
    }
}
