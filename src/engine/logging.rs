//! Level-filtered log fan-out to local handlers and remote sessions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::protocol::JsonRpcNotification;
use crate::engine::session::SessionManager;

/// Log severity levels, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    /// Syslog severity code (RFC 5424; lower is more severe).
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 7,
            LogLevel::Info => 6,
            LogLevel::Notice => 5,
            LogLevel::Warning => 4,
            LogLevel::Error => 3,
            LogLevel::Critical => 2,
            LogLevel::Alert => 1,
            LogLevel::Emergency => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Alert => "alert",
            LogLevel::Emergency => "emergency",
        }
    }
}

/// Params of logging/setLevel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelParams {
    pub level: LogLevel,
}

/// Params of notifications/message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessageParams {
    pub level: LogLevel,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
}

/// A locally-registered log sink.
pub type LocalLogHandler = Box<dyn Fn(LogLevel, &Value, Option<&str>) + Send + Sync>;

/// Fan-out of log messages: local handlers first (in registration order),
/// then `notifications/message` to every OPERATING session.
pub struct LoggingBroadcaster {
    sessions: Arc<SessionManager>,
    threshold: RwLock<LogLevel>,
    handlers: RwLock<Vec<LocalLogHandler>>,
}

impl LoggingBroadcaster {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            threshold: RwLock::new(LogLevel::Info),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Set the minimum level that passes the filter.
    pub async fn set_level(&self, level: LogLevel) {
        *self.threshold.write().await = level;
    }

    pub async fn level(&self) -> LogLevel {
        *self.threshold.read().await
    }

    /// Register a local handler, invoked for every message at or above the
    /// threshold, in registration order.
    pub async fn add_handler(&self, handler: LocalLogHandler) {
        self.handlers.write().await.push(handler);
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Emit a log message. Returns the number of sessions the remote
    /// notification was queued for (zero when filtered out).
    pub async fn log(&self, level: LogLevel, data: Value, logger: Option<&str>) -> usize {
        if level < *self.threshold.read().await {
            return 0;
        }

        {
            let handlers = self.handlers.read().await;
            for handler in handlers.iter() {
                handler(level, &data, logger);
            }
        }

        let params = LogMessageParams {
            level,
            data,
            logger: logger.map(String::from),
        };
        let notification = JsonRpcNotification::new(
            "notifications/message",
            serde_json::to_value(params).ok(),
        );
        self.sessions.broadcast_operating(notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::{ClientCapabilities, Implementation, PROTOCOL_VERSION};
    use crate::engine::session::Outbound;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_level_ordering_and_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Warning);
        assert_eq!(LogLevel::Debug.severity(), 7);
        assert_eq!(LogLevel::Emergency.severity(), 0);
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(serde_json::to_string(&LogLevel::Warning).unwrap(), "\"warning\"");
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_threshold_filters() {
        let sessions = Arc::new(SessionManager::new());
        let broadcaster = LoggingBroadcaster::new(sessions);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        broadcaster
            .add_handler(Box::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        broadcaster.set_level(LogLevel::Warning).await;
        broadcaster.log(LogLevel::Info, json!("quiet"), None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        broadcaster.log(LogLevel::Error, json!("loud"), None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let sessions = Arc::new(SessionManager::new());
        let broadcaster = LoggingBroadcaster::new(sessions);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            broadcaster
                .add_handler(Box::new(move |_, _, _| {
                    order.lock().unwrap().push(tag);
                }))
                .await;
        }

        broadcaster.log(LogLevel::Info, json!("x"), None).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_remote_notification_to_operating_sessions() {
        let sessions = Arc::new(SessionManager::new());
        let broadcaster = LoggingBroadcaster::new(sessions.clone());

        let (id, mut rx) = sessions.open().await;
        sessions
            .begin_initialize(
                id,
                Implementation {
                    name: "c".to_string(),
                    version: "1".to_string(),
                },
                ClientCapabilities::default(),
                PROTOCOL_VERSION.to_string(),
            )
            .await
            .unwrap();
        sessions.mark_operating(id).await.unwrap();

        let delivered = broadcaster
            .log(LogLevel::Warning, json!({"event": "slow_query"}), Some("db"))
            .await;
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            Outbound::Notification(n) => {
                assert_eq!(n.method, "notifications/message");
                let params: LogMessageParams = serde_json::from_value(n.params.unwrap()).unwrap();
                assert_eq!(params.level, LogLevel::Warning);
                assert_eq!(params.logger.as_deref(), Some("db"));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
}
