use axum::{
    debug_handler,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::{bearer_token, AuthError, IdentityProvider},
    config::ChatConfig,
    AppResult, AppState,
};

use super::{connection::ChatSession, ConnectionId, HubHandle, Outbox, Phase, RoomId};

/// Browsers cannot set headers on a WebSocket request, so the token may
/// also ride in the query string.
#[derive(Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn global_ws(
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(provider): State<IdentityProvider>,
    State(hub): State<HubHandle>,
    State(db_pool): State<SqlitePool>,
    State(chat): State<ChatConfig>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    upgrade(RoomId::global(), query, &headers, &provider, hub, db_pool, chat, ws)
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(provider): State<IdentityProvider>,
    State(hub): State<HubHandle>,
    State(db_pool): State<SqlitePool>,
    State(chat): State<ChatConfig>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    upgrade(RoomId::parse(&room)?, query, &headers, &provider, hub, db_pool, chat, ws)
}

/// The handshake: without a valid credential the upgrade is refused and no
/// chat event is ever processed for this request.
#[allow(clippy::too_many_arguments)]
fn upgrade(
    room: RoomId,
    WsQuery { token }: WsQuery,
    headers: &HeaderMap,
    provider: &IdentityProvider,
    hub: HubHandle,
    db_pool: SqlitePool,
    chat: ChatConfig,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let token = bearer_token(headers)
        .or(token.as_deref())
        .ok_or(AuthError::MissingCredential);
    let claims = token.and_then(|token| provider.verify(token));
    let phase = Phase::Connecting.handshake(claims.is_ok())?;
    let claims = claims.inspect_err(|err| {
        tracing::info!(%room, error = %err, ?phase, "handshake refused");
    })?;

    let id = ConnectionId::new();
    let (outbox, inbox) = Outbox::channel(chat.outbox_capacity);
    let session = ChatSession {
        id,
        room,
        claims,
        phase,
        hub,
        db_pool,
        outbox,
    };

    Ok(ws.on_upgrade(move |socket| session.run(socket, inbox)))
}
