// src/realtime.rs
//
// In-process publish/subscribe room hub plus the WebSocket endpoint feeding it.
// Every connection auto-joins its user room (`user_<id>`); chat rooms
// (`chat_<id>`) are joined on demand after a membership check. Publish is
// fire-and-forget: a disconnected client simply misses the event and
// reconciles via a later poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};

use crate::{
    models::{message::Message, notification::Notification},
    state::AppState,
    utils::jwt::{TOKEN_ACCESS, verify_token_type},
};

/// Events the server pushes into rooms.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        chat_id: i64,
        message: Message,
    },
    NewNotification {
        notification: Notification,
    },
    UnreadCountUpdated {
        chat_id: Option<i64>,
        unread_count: i64,
    },
    NotificationRead {
        notification_ids: Vec<i64>,
    },
    UserTyping {
        chat_id: i64,
        user_id: i64,
    },
    MessageReadReceipt {
        chat_id: i64,
        reader_id: i64,
    },
    SystemAnnouncement {
        title: String,
        body: String,
    },
}

/// Frames a connected client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    JoinChat { chat_id: i64 },
    LeaveChat { chat_id: i64 },
    Typing { chat_id: i64 },
    Ping,
}

pub fn user_room(user_id: i64) -> String {
    format!("user_{}", user_id)
}

pub fn chat_room(chat_id: i64) -> String {
    format!("chat_{}", chat_id)
}

type Rooms = HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>;

/// Room-keyed broadcast hub shared by all HTTP handlers and socket tasks.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    rooms: Arc<RwLock<Rooms>>,
    next_id: Arc<AtomicU64>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn join(&self, room: &str, connection_id: u64, tx: mpsc::UnboundedSender<String>) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id, tx);
    }

    pub async fn leave(&self, room: &str, connection_id: u64) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn leave_all(&self, connection_id: u64) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    /// Broadcasts an event to every connection in the room. Best-effort,
    /// at-most-once: closed senders are pruned, an empty room is a no-op.
    pub async fn publish(&self, room: &str, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to serialize realtime event: {}", e);
                return;
            }
        };

        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|_, tx| tx.send(payload.clone()).is_ok());
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }
}

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// `GET /api/ws?token=...` — JWT-authenticated WebSocket upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, StatusCode> {
    let claims = verify_token_type(&query.token, &state.config.jwt_secret, TOKEN_ACCESS)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let user_id = claims.user_id();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

async fn handle_socket(socket: WebSocket, user_id: i64, state: AppState) {
    tracing::info!("WebSocket connected for user {}", user_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let hub = state.hub.clone();
    let connection_id = hub.next_connection_id();
    hub.join(&user_room(user_id), connection_id, tx.clone()).await;

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_hub = hub.clone();
    let pool = state.pool.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    let parsed: Result<ClientFrame, _> = serde_json::from_str(&text);
                    match parsed {
                        Ok(frame) => {
                            handle_client_frame(&recv_hub, &pool, connection_id, user_id, frame, &tx)
                                .await;
                        }
                        Err(e) => {
                            tracing::debug!("Ignoring malformed client frame: {}", e);
                        }
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    hub.leave_all(connection_id).await;
    tracing::info!("WebSocket disconnected for user {}", user_id);
}

async fn handle_client_frame(
    hub: &RealtimeHub,
    pool: &PgPool,
    connection_id: u64,
    user_id: i64,
    frame: ClientFrame,
    tx: &mpsc::UnboundedSender<String>,
) {
    match frame {
        ClientFrame::JoinChat { chat_id } => {
            // Only participants may listen to a chat room.
            match is_chat_participant(pool, chat_id, user_id).await {
                Ok(true) => {
                    hub.join(&chat_room(chat_id), connection_id, tx.clone()).await;
                }
                Ok(false) => {
                    tracing::debug!(
                        "User {} denied joining chat room {}",
                        user_id,
                        chat_id
                    );
                }
                Err(e) => {
                    tracing::error!("Chat membership check failed: {}", e);
                }
            }
        }
        ClientFrame::LeaveChat { chat_id } => {
            hub.leave(&chat_room(chat_id), connection_id).await;
        }
        ClientFrame::Typing { chat_id } => {
            hub.publish(&chat_room(chat_id), &ServerEvent::UserTyping { chat_id, user_id })
                .await;
        }
        ClientFrame::Ping => {
            let _ = tx.send("{\"type\":\"pong\"}".to_string());
        }
    }
}

async fn is_chat_participant(pool: &PgPool, chat_id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM chats WHERE id = $1 AND (user1_id = $2 OR user2_id = $2)",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}
