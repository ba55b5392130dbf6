use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ticket::Player;

/// `player_id -> session_id` map. The socket layer owns the writes (register
/// on connect, unregister on disconnect); the engine only ever resolves.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub async fn register(&self, player_id: &str, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(player_id.to_string(), session_id.to_string());
    }

    /// Remove whichever player currently maps to `session_id`.
    pub async fn unregister_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, sid| sid != session_id);
    }

    pub async fn resolve(&self, player_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions.get(player_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Per-recipient delivery for a formed match, addressed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyMessage {
    pub message: String,
    pub match_id: String,
    pub region: String,
    pub teams: BTreeMap<String, Vec<Player>>,
}

/// Delivery seam between the notifier and the socket layer. Returns whether
/// the session was still reachable; the notifier keeps no retry state either
/// way.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send_notify(&self, session_id: &str, message: NotifyMessage) -> bool;
}
