use axum::{
    debug_handler,
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{auth::CurrentUser, AppResult, AppState};

use super::{ChatMessage, RoomId};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChatMessage {
    pub id: Uuid,
    pub room: String,
    pub user_id: Uuid,
    pub username: String,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

/// Writes relayed messages off the hub's path. Failures are logged and the
/// message is dropped.
pub fn spawn_recorder(db_pool: SqlitePool) -> (mpsc::UnboundedSender<StoredChatMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoredChatMessage>();
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(err) = insert(&db_pool, &message).await {
                tracing::error!(error = %err, room = %message.room, "failed to persist chat message");
            }
        }
    });
    (tx, task)
}

async fn insert(db_pool: &SqlitePool, message: &StoredChatMessage) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO chat_messages (id,room,user_id,username,message,timestamp) VALUES (?,?,?,?,?,?)")
        .bind(message.id.to_string())
        .bind(&message.room)
        .bind(message.user_id.to_string())
        .bind(&message.username)
        .bind(&message.message)
        .bind(message.timestamp.format(&Rfc3339)?)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// The newest `limit` messages of a room, oldest first.
pub async fn recent(db_pool: &SqlitePool, room: &RoomId, limit: u32) -> anyhow::Result<Vec<ChatMessage>> {
    // ids are UUIDv7, so they sort by creation time even within one second
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT username,message,timestamp FROM chat_messages WHERE room=? ORDER BY id DESC LIMIT ?",
    )
    .bind(room.as_str())
    .bind(limit)
    .fetch_all(db_pool)
    .await?;

    let mut messages = rows
        .into_iter()
        .map(|(username, message, timestamp)| {
            Ok(ChatMessage {
                username,
                message,
                timestamp: OffsetDateTime::parse(&timestamp, &Rfc3339)?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<u32>,
}

#[derive(Serialize)]
pub(crate) struct HistoryResponse {
    room: String,
    messages: Vec<ChatMessage>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path(room): Path<String>,
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
    CurrentUser(_claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<HistoryResponse>> {
    let room = RoomId::parse(&room)?;
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let messages = recent(&db_pool, &room, limit).await?;

    Ok(Json(HistoryResponse {
        room: room.to_string(),
        messages,
    }))
}
