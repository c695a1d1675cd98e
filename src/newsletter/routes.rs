use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{auth::validate_email, AppResult, AppState};

use super::{
    mailer::{verification_token, Mailer},
    store, NewsletterError, Preferences, Subscriber,
};

#[derive(Serialize)]
pub(crate) struct Notice {
    message: &'static str,
}

#[derive(Deserialize)]
pub(crate) struct SubscribeRequest {
    email: String,
    #[serde(default)]
    preferences: Preferences,
}

#[derive(Deserialize)]
pub(crate) struct EmailRequest {
    email: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn subscribe(
    State(db_pool): State<SqlitePool>,
    State(mailer): State<Mailer>,
    Json(SubscribeRequest { email, preferences }): Json<SubscribeRequest>,
) -> AppResult<(StatusCode, Json<Notice>)> {
    let email = validate_email(&email).map_err(|err| NewsletterError::Invalid(err.to_string()))?;
    if store::find_by_email(&db_pool, &email).await?.is_some() {
        return Err(NewsletterError::AlreadySubscribed)?;
    }

    let token = verification_token();
    match store::insert(&db_pool, &email, &preferences.normalized(), &token).await {
        Ok(subscriber) => tracing::info!(subscriber_id = %subscriber.id, "new newsletter subscriber"),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            return Err(NewsletterError::AlreadySubscribed)?;
        }
        Err(err) => return Err(err)?,
    }
    mailer.send_verification(&email, &token);

    Ok((
        StatusCode::CREATED,
        Json(Notice {
            message: "Please check your email to verify your subscription",
        }),
    ))
}

#[debug_handler(state = AppState)]
pub(crate) async fn verify(
    Path(token): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Notice>> {
    if !store::verify(&db_pool, &token).await? {
        return Err(NewsletterError::InvalidToken)?;
    }
    Ok(Json(Notice {
        message: "Email verified successfully",
    }))
}

#[derive(Deserialize)]
pub(crate) struct PreferencesRequest {
    email: String,
    preferences: Preferences,
}

#[debug_handler(state = AppState)]
pub(crate) async fn preferences(
    State(db_pool): State<SqlitePool>,
    Json(PreferencesRequest { email, preferences }): Json<PreferencesRequest>,
) -> AppResult<Json<Subscriber>> {
    let email = validate_email(&email).map_err(|_| NewsletterError::NotFound)?;
    let subscriber = store::update_preferences(&db_pool, &email, &preferences.normalized())
        .await?
        .ok_or(NewsletterError::NotFound)?;
    Ok(Json(subscriber))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unsubscribe(
    State(db_pool): State<SqlitePool>,
    Json(EmailRequest { email }): Json<EmailRequest>,
) -> AppResult<Json<Notice>> {
    let email = validate_email(&email).map_err(|_| NewsletterError::NotFound)?;
    if !store::delete(&db_pool, &email).await? {
        return Err(NewsletterError::NotFound)?;
    }
    tracing::info!("newsletter subscriber left");
    Ok(Json(Notice {
        message: "Successfully unsubscribed",
    }))
}
