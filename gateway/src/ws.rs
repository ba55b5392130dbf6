use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

use common_mm::session::{NotifyMessage, NotifySink};

use crate::{count_request, AppState, WS_PATH};

/// Frames pushed down a player socket.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WsDelivery {
    SendNotify(NotifyMessage),
}

/// Live socket outboxes keyed by session id. The hub is the notifier's
/// delivery surface; the per-session tasks drain the outboxes.
#[derive(Debug, Default)]
pub struct WsHub {
    senders: RwLock<HashMap<String, mpsc::UnboundedSender<NotifyMessage>>>,
}

impl WsHub {
    async fn attach(&self, session_id: &str, sender: mpsc::UnboundedSender<NotifyMessage>) {
        let mut senders = self.senders.write().await;
        senders.insert(session_id.to_string(), sender);
    }

    async fn detach(&self, session_id: &str) {
        let mut senders = self.senders.write().await;
        senders.remove(session_id);
    }
}

#[async_trait]
impl NotifySink for WsHub {
    async fn send_notify(&self, session_id: &str, message: NotifyMessage) -> bool {
        let senders = self.senders.read().await;
        match senders.get(session_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "playerId")]
    pub player_id: Option<String>,
}

/// GET /ws?playerId=... — anonymous connects are refused, matching the
/// socket contract: without a player id there is nothing to notify.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    count_request(WS_PATH);

    let Some(player_id) = params.player_id.filter(|id| !id.trim().is_empty()) else {
        debug!("anonymous socket connect refused");
        return StatusCode::BAD_REQUEST.into_response();
    };

    ws.on_upgrade(move |socket| ws_session(socket, state, player_id))
}

async fn ws_session(mut socket: WebSocket, state: AppState, player_id: String) {
    let session_id = Uuid::new_v4().to_string();
    let (tx, mut outbox) = mpsc::unbounded_channel();

    state.hub.attach(&session_id, tx).await;
    state.sessions.register(&player_id, &session_id).await;
    info!(%player_id, %session_id, "socket session opened");

    loop {
        tokio::select! {
            maybe_notify = outbox.recv() => {
                let Some(notify) = maybe_notify else { break; };
                match serde_json::to_string(&WsDelivery::SendNotify(notify)) {
                    Ok(text) => {
                        if socket.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => error!(%err, "could not encode notify frame"),
                }
            }
            maybe_msg = socket.recv() => {
                let Some(msg) = maybe_msg else { break; };
                match msg {
                    Ok(WsMessage::Ping(payload)) => {
                        let _ = socket.send(WsMessage::Pong(payload)).await;
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.unregister_session(&session_id).await;
    state.hub.detach(&session_id).await;
    info!(%player_id, %session_id, "socket session closed");
}
