use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

/// Older messages are dropped once a session has this many queued.
pub const MAX_PENDING: usize = 32;

/// One-shot messages queued per session and shown on the next rendered page.
#[derive(Debug, Default)]
pub struct MessageStore {
    pending: RwLock<HashMap<String, Vec<Message>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session: &str, level: Level, text: impl Into<String>) {
        let mut pending = self.pending.write().await;
        let queue = pending.entry(session.to_string()).or_default();
        if queue.len() >= MAX_PENDING {
            queue.drain(..=queue.len() - MAX_PENDING);
        }
        queue.push(Message {
            level,
            text: text.into(),
        });
    }

    pub async fn success(&self, session: &str, text: impl Into<String>) {
        self.add(session, Level::Success, text).await;
    }

    pub async fn error(&self, session: &str, text: impl Into<String>) {
        self.add(session, Level::Error, text).await;
    }

    /// Drain the queue for `session`, oldest first.
    pub async fn take(&self, session: &str) -> Vec<Message> {
        let mut pending = self.pending.write().await;
        pending.remove(session).unwrap_or_default()
    }

    /// Drop anything queued for a session that is going away.
    pub async fn discard(&self, session: &str) {
        self.pending.write().await.remove(session);
    }
}
