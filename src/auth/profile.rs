use axum::{debug_handler, extract::State, Json};
use sqlx::SqlitePool;

use crate::{db, AppResult, AppState};

use super::{AuthError, CurrentUser, PublicUser};

/// Lets a client check that a stored token still names a live account.
#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<PublicUser>> {
    let user = db::find_user(&db_pool, claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(user.into()))
}
