//! Progress token bookkeeping and notification emission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::{JsonRpcNotification, ProgressToken};
use crate::engine::session::{Outbound, SessionId, SessionManager};
use crate::error::Result;

/// Progress notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

struct ProgressEntry {
    session: SessionId,
    progress: u64,
    total: Option<u64>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Tracks in-flight progress tokens and emits `notifications/progress` to
/// the owning session.
///
/// Updates are monotonically non-decreasing; a regressing update, or one
/// against an unknown or completed token, is logged and ignored.
pub struct ProgressTracker {
    sessions: Arc<SessionManager>,
    entries: RwLock<HashMap<ProgressToken, ProgressEntry>>,
    next_id: AtomicI64,
}

impl ProgressTracker {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Create a fresh numeric token owned by `session`.
    pub async fn create_token(&self, session: SessionId, total: Option<u64>) -> ProgressToken {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = ProgressToken::Number(id);
        self.track(token.clone(), session, total).await;
        token
    }

    /// Track a client-supplied token (from a request's `_meta`) for `session`.
    pub async fn adopt_token(
        &self,
        token: ProgressToken,
        session: SessionId,
        total: Option<u64>,
    ) {
        self.track(token, session, total).await;
    }

    async fn track(&self, token: ProgressToken, session: SessionId, total: Option<u64>) {
        self.entries.write().await.insert(
            token,
            ProgressEntry {
                session,
                progress: 0,
                total,
                created_at: Utc::now(),
            },
        );
    }

    /// Record new progress for a token and emit a notification.
    ///
    /// No-op-safe: unknown or completed tokens, and regressing values, are
    /// logged and ignored.
    pub async fn update(
        &self,
        token: &ProgressToken,
        progress: u64,
        total: Option<u64>,
    ) -> Result<()> {
        let target = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(token) {
                Some(entry) => {
                    if progress < entry.progress {
                        tracing::warn!(
                            ?token,
                            current = entry.progress,
                            attempted = progress,
                            "ignoring regressing progress update"
                        );
                        return Ok(());
                    }
                    entry.progress = progress;
                    if total.is_some() {
                        entry.total = total;
                    }
                    (entry.session, entry.total)
                }
                None => {
                    tracing::warn!(?token, "progress update for unknown or completed token");
                    return Ok(());
                }
            }
        };

        self.emit(token.clone(), progress, target.1, target.0).await;
        Ok(())
    }

    /// Emit a final notification (progress = total where known) and free the
    /// token. Further updates against it are no-ops.
    pub async fn complete(&self, token: &ProgressToken) -> Result<()> {
        let entry = match self.entries.write().await.remove(token) {
            Some(entry) => entry,
            None => {
                tracing::warn!(?token, "completion of unknown or completed token");
                return Ok(());
            }
        };

        let final_progress = entry.total.unwrap_or(entry.progress);
        self.emit(token.clone(), final_progress, entry.total, entry.session)
            .await;
        Ok(())
    }

    /// Free every token owned by a departing session without emitting.
    pub async fn release_session(&self, session: SessionId) {
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.session != session);
    }

    /// Whether a token is currently tracked.
    pub async fn is_active(&self, token: &ProgressToken) -> bool {
        self.entries.read().await.contains_key(token)
    }

    pub async fn active_count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn emit(
        &self,
        token: ProgressToken,
        progress: u64,
        total: Option<u64>,
        session: SessionId,
    ) {
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
        };
        let notification = JsonRpcNotification::new(
            "notifications/progress",
            serde_json::to_value(params).ok(),
        );
        self.sessions
            .send_to(session, Outbound::Notification(notification))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn tracker_with_session() -> (
        ProgressTracker,
        SessionId,
        mpsc::Receiver<Outbound>,
    ) {
        let sessions = Arc::new(SessionManager::new());
        let (id, rx) = sessions.open().await;
        (ProgressTracker::new(sessions), id, rx)
    }

    fn progress_of(msg: Outbound) -> ProgressParams {
        match msg {
            Outbound::Notification(n) => {
                assert_eq!(n.method, "notifications/progress");
                serde_json::from_value(n.params.unwrap()).unwrap()
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let (tracker, session, mut rx) = tracker_with_session().await;

        let token = tracker.create_token(session, Some(100)).await;

        tracker.update(&token, 50, Some(100)).await.unwrap();
        tracker.update(&token, 100, Some(100)).await.unwrap();
        tracker.complete(&token).await.unwrap();

        let first = progress_of(rx.recv().await.unwrap());
        assert_eq!(first.progress, 50);
        assert_eq!(first.total, Some(100));

        let second = progress_of(rx.recv().await.unwrap());
        assert_eq!(second.progress, 100);

        let last = progress_of(rx.recv().await.unwrap());
        assert_eq!(last.progress, 100);

        // The token is freed; a further update emits nothing.
        tracker.update(&token, 120, None).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!tracker.is_active(&token).await);
    }

    #[tokio::test]
    async fn test_regressing_update_ignored() {
        let (tracker, session, mut rx) = tracker_with_session().await;
        let token = tracker.create_token(session, Some(10)).await;

        tracker.update(&token, 7, None).await.unwrap();
        let _ = rx.recv().await.unwrap();

        tracker.update(&token, 3, None).await.unwrap();
        assert!(rx.try_recv().is_err());

        // Equal progress is non-decreasing and still emits.
        tracker.update(&token, 7, None).await.unwrap();
        let params = progress_of(rx.recv().await.unwrap());
        assert_eq!(params.progress, 7);
    }

    #[tokio::test]
    async fn test_complete_without_total_uses_last_progress() {
        let (tracker, session, mut rx) = tracker_with_session().await;
        let token = tracker.create_token(session, None).await;

        tracker.update(&token, 42, None).await.unwrap();
        let _ = rx.recv().await.unwrap();

        tracker.complete(&token).await.unwrap();
        let last = progress_of(rx.recv().await.unwrap());
        assert_eq!(last.progress, 42);
        assert_eq!(last.total, None);
    }

    #[tokio::test]
    async fn test_unknown_token_is_noop() {
        let (tracker, _session, mut rx) = tracker_with_session().await;
        let token = ProgressToken::String("ghost".to_string());

        tracker.update(&token, 1, None).await.unwrap();
        tracker.complete(&token).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_adopted_client_token() {
        let (tracker, session, mut rx) = tracker_with_session().await;
        let token = ProgressToken::String("op-7".to_string());

        tracker.adopt_token(token.clone(), session, None).await;
        tracker.update(&token, 5, Some(10)).await.unwrap();

        let params = progress_of(rx.recv().await.unwrap());
        assert_eq!(params.progress_token, token);
        assert_eq!(params.total, Some(10));
    }

    #[tokio::test]
    async fn test_release_session_frees_tokens() {
        let (tracker, session, _rx) = tracker_with_session().await;
        let token = tracker.create_token(session, None).await;
        assert_eq!(tracker.active_count().await, 1);

        tracker.release_session(session).await;
        assert_eq!(tracker.active_count().await, 0);
        assert!(!tracker.is_active(&token).await);
    }
}
