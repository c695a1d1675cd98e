use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{db, AppResult, AppState};

use super::{register::validate_email, verify_password, AuthError, AuthResponse, IdentityProvider};

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(db_pool): State<SqlitePool>,
    State(provider): State<IdentityProvider>,
    Json(LoginRequest { email, password }): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = validate_email(&email).map_err(|_| AuthError::BadLogin)?;
    let Some(user) = db::find_user_by_email(&db_pool, &email).await? else {
        return Err(AuthError::BadLogin)?;
    };

    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::debug!(user_id = %user.id, "wrong password");
        return Err(AuthError::BadLogin)?;
    }

    let token = provider.issue(&user)?;
    tracing::info!(user_id = %user.id, username = %user.username, "welcome back");

    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}
