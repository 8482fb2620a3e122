//! WebSocket transport and health endpoint.
//!
//! One engine session per socket connection; the engine's outbound channel
//! is pumped into the socket sink while inbound text frames feed the
//! dispatcher.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::server::Engine;
use crate::engine::transport::encode_outbound;
use crate::error::Result;

/// WebSocket server state.
#[derive(Clone)]
struct WsState {
    engine: Arc<Engine>,
}

/// Build the router serving `/ws` and `/health`.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(WsState { engine })
}

/// Start the WebSocket server. Runs until ctrl-c, then tears down every
/// session before returning.
pub async fn start_server(config: &Config, engine: Arc<Engine>) -> Result<()> {
    let app = router(engine.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting WebSocket server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}

/// Health check endpoint.
async fn health_check(State(state): State<WsState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "metrics": state.engine.metrics().snapshot(),
    }))
}

/// Upgrade handler: each accepted socket becomes one engine session.
async fn ws_handler(State(state): State<WsState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.engine))
}

async fn handle_socket(socket: WebSocket, engine: Arc<Engine>) {
    let (session_id, outbound_rx) = engine.connect().await;
    debug!(session = %session_id, "websocket session connected");

    let (sink, mut stream) = socket.split();

    // Pump the session's outbound channel into the socket.
    let mut outbound = ReceiverStream::new(outbound_rx).map(|message| {
        encode_outbound(&message)
            .map(|encoded| Message::Text(encoded.into()))
            .map_err(axum::Error::new)
    });
    let mut sink_task = tokio::spawn(async move {
        let mut sink = sink;
        while let Some(frame) = outbound.next().await {
            match frame {
                Ok(frame) => {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("dropping unencodable outbound message: {e}");
                }
            }
        }
    });

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        engine.clone().handle_message(session_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no protocol messages.
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, "websocket read error: {e}");
                        break;
                    }
                }
            }
            _ = &mut sink_task => break,
        }
    }

    engine.disconnect(session_id).await;
    sink_task.abort();
    debug!(session = %session_id, "websocket session closed");
}
