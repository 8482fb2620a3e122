//! Tenant Engine server binary.
//!
//! Builds one engine instance, registers a demo capability set per tenant
//! from the manifest, and serves the selected transport.

use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tenant_engine_rs::config::{Args, Config, TenantEntry, TenantManifest, TransportMode};
use tenant_engine_rs::engine::protocol::{
    GetPromptResult, Implementation, Prompt, PromptArgument, PromptMessage, Resource, Tool,
};
use tenant_engine_rs::engine::tools::{
    get_string_arg, success_result, text_content, tool_fn,
};
use tenant_engine_rs::engine::transport::{StdioTransport, Transport};
use tenant_engine_rs::error::Result;
use tenant_engine_rs::tenant::memory::{InMemoryDatabase, InMemoryStorage, StaticAuth};
use tenant_engine_rs::tenant::{Identity, TenantAdapter, TenantContext};
use tenant_engine_rs::{Engine, SERVER_NAME, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr so the stdio transport keeps stdout clean.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config: Config = args.into();

    info!("Tenant Engine v{VERSION}");
    info!("Transport: {:?}", config.transport);

    let manifest = match &config.tenants {
        Some(path) => TenantManifest::load(path)?,
        None => TenantManifest::single("default"),
    };
    info!("Serving {} tenant(s)", manifest.tenants.len());

    let engine = Engine::new(Implementation {
        name: SERVER_NAME.to_string(),
        version: VERSION.to_string(),
    });

    register_builtin_capabilities(&engine, &manifest, config.max_in_flight).await;
    info!("Registered {} tools", engine.tools().len().await);

    match config.transport {
        TransportMode::Stdio => {
            info!("Starting stdio transport...");
            let mut transport = StdioTransport::new();
            transport.serve(engine.clone()).await?;
            engine.shutdown().await;
        }
        TransportMode::Ws => {
            info!("Starting WebSocket transport on port {}...", config.port);
            tenant_engine_rs::ws::start_server(&config, engine).await?;
        }
    }

    Ok(())
}

/// Register the demo capability set: a plain echo tool, per-tenant storage
/// and admin tools, a config resource, and a summarize prompt.
async fn register_builtin_capabilities(
    engine: &Arc<Engine>,
    manifest: &TenantManifest,
    max_in_flight: usize,
) {
    engine
        .tools()
        .register(tool_fn(
            Tool {
                name: "echo".to_string(),
                description: "Echo the input back".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
            },
            |args| async move {
                let text = get_string_arg(&args, "text")?;
                Ok(success_result(text))
            },
        ))
        .await;

    // Forward engine log broadcasts into the local tracing subscriber.
    engine
        .logging()
        .add_handler(Box::new(|level, data, logger| {
            let logger = logger.unwrap_or("engine");
            tracing::info!(target: "broadcast", %logger, level = level.as_str(), %data);
        }))
        .await;

    let tenant_ids: Vec<String> = manifest.tenants.iter().map(|t| t.id.clone()).collect();

    for entry in &manifest.tenants {
        let adapter = build_adapter(entry, &tenant_ids, max_in_flight).await;
        register_tenant_capabilities(engine, entry, &adapter).await;
    }
}

async fn build_adapter(
    entry: &TenantEntry,
    tenant_ids: &[String],
    max_in_flight: usize,
) -> TenantAdapter {
    let database = InMemoryDatabase::new();
    database
        .seed(
            "SELECT id FROM tenants",
            tenant_ids.iter().map(|id| json!({ "id": id })).collect(),
        )
        .await;

    // The demo identity is the first configured admin, or an unprivileged
    // service account when the manifest grants none.
    let identity = match entry.admin_users.first() {
        Some(user) => Identity::new(user.clone(), entry.id.clone())
            .with_roles(vec!["admin".to_string()]),
        None => Identity::new(format!("service@{}", entry.id), entry.id.clone()),
    };

    let context = TenantContext::new(
        entry.id.clone(),
        database,
        InMemoryStorage::new(),
        StaticAuth::new(identity),
    );
    TenantAdapter::new(context, max_in_flight)
}

async fn register_tenant_capabilities(
    engine: &Arc<Engine>,
    entry: &TenantEntry,
    adapter: &TenantAdapter,
) {
    let tenant_id = entry.id.clone();

    adapter
        .register_tool(
            engine,
            Tool {
                name: format!("{tenant_id}.list_files"),
                description: format!("List files in the {tenant_id} storage bucket"),
                input_schema: json!({
                    "type": "object",
                    "properties": { "prefix": { "type": "string" } }
                }),
            },
            |ctx, args| async move {
                let prefix = args
                    .get("prefix")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let files = ctx.storage.list_files(&prefix).await?;
                Ok(success_result(files.join("\n")))
            },
        )
        .await;

    adapter
        .register_admin_tool(
            engine,
            Tool {
                name: format!("{tenant_id}.list_tenants"),
                description: "List every tenant on this instance".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
            |ctx, _args| async move {
                let rows = ctx
                    .database
                    .execute_query("SELECT id FROM tenants", &[])
                    .await?;
                let ids: Vec<String> = rows
                    .iter()
                    .filter_map(|r| r["id"].as_str().map(String::from))
                    .collect();
                Ok(success_result(ids.join("\n")))
            },
        )
        .await;

    let display_name = entry
        .display_name
        .clone()
        .unwrap_or_else(|| entry.id.clone());
    adapter
        .register_resource(
            engine,
            Resource {
                uri: format!("tenant://{tenant_id}/config"),
                name: format!("{display_name} configuration"),
                description: None,
                mime_type: Some("application/json".to_string()),
            },
            move |ctx, uri| {
                let display_name = display_name.clone();
                async move {
                    Ok(tenant_engine_rs::engine::protocol::ResourceContents {
                        uri,
                        mime_type: Some("application/json".to_string()),
                        text: Some(
                            json!({
                                "tenant": ctx.tenant_id,
                                "displayName": display_name,
                            })
                            .to_string(),
                        ),
                        blob: None,
                    })
                }
            },
        )
        .await;

    adapter
        .register_prompt(
            engine,
            Prompt {
                name: format!("{tenant_id}.summarize"),
                description: Some("Summarize a topic for this tenant's audience".to_string()),
                arguments: vec![PromptArgument {
                    name: "topic".to_string(),
                    description: Some("What to summarize".to_string()),
                    required: true,
                }],
            },
            |ctx, args| async move {
                let topic = args.get("topic").cloned().unwrap_or_default();
                Ok(GetPromptResult {
                    description: Some("Summarize a topic for this tenant's audience".to_string()),
                    messages: vec![PromptMessage {
                        role: "user".to_string(),
                        content: text_content(format!(
                            "Summarize {topic} for the {} team.",
                            ctx.tenant_id
                        )),
                    }],
                })
            },
        )
        .await;
}
