//! Session lifecycle and per-session outbound channels.
//!
//! One session exists per transport connection. The manager owns the map of
//! live sessions; all state transitions funnel through it.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::protocol::{
    ClientCapabilities, Implementation, JsonRpcNotification, JsonRpcResponse,
};
use crate::error::{Error, Result};

/// Session identifier, unique per transport connection.
pub type SessionId = Uuid;

/// Outbound channel capacity per session.
const OUTBOUND_CAPACITY: usize = 100;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, `initialize` not yet received.
    Uninitialized,
    /// `initialize` received, awaiting the client's `initialized` notification.
    Initializing,
    /// Fully negotiated; all methods are serviceable.
    Operating,
    /// Torn down; kept only transiently while teardown completes.
    Closed,
}

/// A message queued for delivery to one client session.
#[derive(Debug, Clone)]
pub enum Outbound {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

struct SessionEntry {
    state: SessionState,
    client_info: Option<Implementation>,
    client_capabilities: Option<ClientCapabilities>,
    protocol_version: Option<String>,
    outbound: mpsc::Sender<Outbound>,
}

/// Registry of live sessions.
///
/// Mutation is serialized through the inner write lock; lookups and fan-out
/// take read guards.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a new transport connection.
    ///
    /// Returns the session id and the receiving half of its outbound channel;
    /// the transport drains the receiver onto the wire.
    pub async fn open(&self) -> (SessionId, mpsc::Receiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let entry = SessionEntry {
            state: SessionState::Uninitialized,
            client_info: None,
            client_capabilities: None,
            protocol_version: None,
            outbound: tx,
        };
        self.sessions.write().await.insert(id, entry);
        debug!(session = %id, "session opened");
        (id, rx)
    }

    /// Remove a session. Returns false if it was already gone.
    pub async fn close(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session = %id, "session closed");
        }
        removed
    }

    pub async fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(&id).map(|e| e.state)
    }

    pub async fn client_info(&self, id: SessionId) -> Option<Implementation> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|e| e.client_info.clone())
    }

    pub async fn client_capabilities(&self, id: SessionId) -> Option<ClientCapabilities> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|e| e.client_capabilities.clone())
    }

    pub async fn protocol_version(&self, id: SessionId) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|e| e.protocol_version.clone())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Record the `initialize` handshake and move the session to
    /// [`SessionState::Initializing`].
    ///
    /// A second `initialize` on a session past that state is rejected: an
    /// idempotent no-op would silently discard a changed client identity.
    pub async fn begin_initialize(
        &self,
        id: SessionId,
        client_info: Implementation,
        client_capabilities: ClientCapabilities,
        protocol_version: String,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        match entry.state {
            SessionState::Uninitialized => {
                entry.client_info = Some(client_info);
                entry.client_capabilities = Some(client_capabilities);
                entry.protocol_version = Some(protocol_version);
                entry.state = SessionState::Initializing;
                Ok(())
            }
            _ => Err(Error::InvalidRequest(
                "initialize received on an already-initialized session".to_string(),
            )),
        }
    }

    /// Complete the handshake on receipt of the client's `initialized`
    /// notification.
    pub async fn mark_operating(&self, id: SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        match entry.state {
            SessionState::Initializing => {
                entry.state = SessionState::Operating;
                Ok(())
            }
            state => Err(Error::InvalidRequest(format!(
                "initialized notification received in {state:?} state"
            ))),
        }
    }

    /// Deliver a message to one session. Returns false if the session is
    /// gone or its channel is closed.
    pub async fn send_to(&self, id: SessionId, message: Outbound) -> bool {
        let sender = {
            let sessions = self.sessions.read().await;
            match sessions.get(&id) {
                Some(entry) => entry.outbound.clone(),
                None => return false,
            }
        };
        if sender.send(message).await.is_err() {
            warn!(session = %id, "outbound channel closed, dropping message");
            return false;
        }
        true
    }

    /// Fan a notification out to every OPERATING session.
    ///
    /// Sessions with a full outbound queue are skipped rather than awaited,
    /// so one slow client cannot stall the broadcast. Returns the number of
    /// sessions the notification was queued for.
    pub async fn broadcast_operating(&self, notification: JsonRpcNotification) -> usize {
        let senders: Vec<(SessionId, mpsc::Sender<Outbound>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, e)| e.state == SessionState::Operating)
                .map(|(id, e)| (*id, e.outbound.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, sender) in senders {
            match sender.try_send(Outbound::Notification(notification.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(session = %id, "dropping notification: {e}"),
            }
        }
        delivered
    }
}
