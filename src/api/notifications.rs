//! Notification inbox and the live WebSocket feed

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth;
use crate::domain::{DomainError, Entity, Page, PageRequest, Principal};
use crate::error::{AppError, AppResult};
use crate::notifications::{Notification, NotificationHub};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// Server-to-client socket frames
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage<'a> {
    Connected { principal_id: Uuid },
    Notification { notification: &'a Notification },
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/:id/read", post(mark_read))
}

async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<InboxQuery>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<Notification>>> {
    let inbox = state
        .notifier()
        .list(principal.id, query.unread_only, page)
        .await?;
    Ok(Json(inbox))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MarkedRead>> {
    if !state.notifier().mark_read(principal.id, id).await? {
        return Err(DomainError::not_found(Entity::Notification, id).into());
    }
    Ok(Json(MarkedRead { updated: 1 }))
}

async fn mark_all_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<MarkedRead>> {
    let updated = state.notifier().mark_all_read(principal.id).await?;
    Ok(Json(MarkedRead { updated }))
}

// =========================================================================
// GET /ws/notifications?token=
// =========================================================================

/// Browsers can't set headers on a WebSocket handshake, so the bearer
/// token travels in the query string and is resolved the same way.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing token".to_string()))?;

    let principal = auth::resolve_token(&state.pool, &token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".to_string()))?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| stream_notifications(socket, hub, principal.id)))
}

async fn stream_notifications(socket: WebSocket, hub: NotificationHub, principal_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = hub.subscribe(principal_id);

    tracing::info!(%principal_id, "Notification socket connected");

    if let Ok(json) = serde_json::to_string(&SocketMessage::Connected { principal_id }) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(notification) = next else { break };
                let frame = SocketMessage::Notification { notification: notification.as_ref() };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Pings are answered by axum; anything else is ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!(%principal_id, "Notification socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_socket_message_shape() {
        let notification = Notification {
            id: Uuid::nil(),
            recipient_id: Uuid::nil(),
            kind: "wallet.updated".to_string(),
            title_en: "Wallet updated".to_string(),
            title_ar: "تم تحديث المحفظة".to_string(),
            body_en: String::new(),
            body_ar: String::new(),
            payload: json!({}),
            is_read: false,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(SocketMessage::Notification {
            notification: &notification,
        })
        .unwrap();

        assert_eq!(value["type"], "notification");
        assert_eq!(value["notification"]["kind"], "wallet.updated");
    }

    #[test]
    fn test_inbox_query_defaults() {
        let query: InboxQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.unread_only);
    }
}
