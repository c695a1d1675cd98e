use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{auth::CurrentUser, AppResult, AppState};

use super::{HubHandle, RoomId};

#[derive(Serialize)]
pub(crate) struct UsersResponse {
    room: String,
    users: Vec<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn users(
    Path(room): Path<String>,
    CurrentUser(_claims): CurrentUser,
    State(hub): State<HubHandle>,
) -> AppResult<Json<UsersResponse>> {
    let room = RoomId::parse(&room)?;
    let users = hub.presence(room.clone()).await?;
    Ok(Json(UsersResponse {
        room: room.to_string(),
        users,
    }))
}
