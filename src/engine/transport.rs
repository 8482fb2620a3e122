//! Transport abstraction and the line-delimited stdio transport.
//!
//! A transport owns one or more client connections, opens an engine session
//! per connection, feeds inbound frames into the dispatcher, and drains the
//! session's outbound channel back onto the wire. Multiple transports can be
//! mounted on one engine simultaneously.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, trace};

use crate::engine::server::Engine;
use crate::engine::session::Outbound;
use crate::error::Result;

/// Transport trait for engine communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serve connections until the transport shuts down.
    async fn serve(&mut self, engine: Arc<Engine>) -> Result<()>;
}

/// Serialize an outbound message to its wire form.
pub fn encode_outbound(message: &Outbound) -> Result<String> {
    let encoded = match message {
        Outbound::Response(response) => serde_json::to_string(response)?,
        Outbound::Notification(notification) => serde_json::to_string(notification)?,
    };
    Ok(encoded)
}

/// Stdio transport: one session over the process's stdin/stdout, newline
/// delimited. Logs go to stderr so the protocol stream stays clean.
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn serve(&mut self, engine: Arc<Engine>) -> Result<()> {
        let (session_id, mut outbound_rx) = engine.connect().await;
        debug!(session = %session_id, "stdio transport connected");

        // Writer task drains the session's outbound channel to stdout.
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();

            while let Some(message) = outbound_rx.recv().await {
                match encode_outbound(&message) {
                    Ok(encoded) => {
                        trace!("sending: {encoded}");
                        if let Err(e) = stdout.write_all(encoded.as_bytes()).await {
                            error!("error writing to stdout: {e}");
                            break;
                        }
                        if let Err(e) = stdout.write_all(b"\n").await {
                            error!("error writing newline: {e}");
                            break;
                        }
                        if let Err(e) = stdout.flush().await {
                            error!("error flushing stdout: {e}");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("error serializing message: {e}");
                    }
                }
            }
        });

        // Read stdin line by line until EOF.
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("EOF on stdin, stopping transport");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    trace!("received: {trimmed}");
                    engine.clone().handle_message(session_id, trimmed).await;
                }
                Err(e) => {
                    error!("error reading stdin: {e}");
                    break;
                }
            }
        }

        engine.disconnect(session_id).await;
        writer.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{JsonRpcNotification, JsonRpcResponse, RequestId};
    use serde_json::json;

    #[test]
    fn test_encode_response() {
        let message = Outbound::Response(JsonRpcResponse::success(
            RequestId::Number(1),
            json!({"ok": true}),
        ));
        let encoded = encode_outbound(&message).unwrap();
        assert!(encoded.contains("\"id\":1"));
        assert!(encoded.contains("\"result\""));
        assert!(!encoded.contains('\n'));
    }

    #[test]
    fn test_encode_notification() {
        let message = Outbound::Notification(JsonRpcNotification::new(
            "notifications/resources/updated",
            Some(json!({"uri": "config://tenant"})),
        ));
        let encoded = encode_outbound(&message).unwrap();
        assert!(encoded.contains("notifications/resources/updated"));
        assert!(!encoded.contains("\"id\""));
    }
}
