pub mod appresult;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod health;
pub mod news;
pub mod newsletter;

use std::time::Instant;

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use appresult::{AppError, AppResult};

use crate::{
    auth::IdentityProvider,
    chat::{Hub, HubHandle, HubSettings},
    config::{ChatConfig, Config},
    health::StartedAt,
    newsletter::Mailer,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub identity: IdentityProvider,
    pub hub: HubHandle,
    pub chat: ChatConfig,
    pub started_at: StartedAt,
    pub mailer: Mailer,
}

impl AppState {
    /// Starts the chat hub (and the history recorder when enabled).
    pub fn start(config: &Config, db_pool: SqlitePool) -> AppState {
        let mut hub = Hub::new(HubSettings::from(config.chat));
        if config.chat.persist_history {
            let (recorder, _) = chat::spawn_recorder(db_pool.clone());
            hub = hub.with_recorder(recorder);
        }
        let (hub, _) = hub.spawn();

        AppState {
            db_pool,
            identity: IdentityProvider::new(&config.jwt_secret, config.jwt_expiry_hours, config.bcrypt_cost),
            hub,
            chat: config.chat,
            started_at: StartedAt(Instant::now()),
            mailer: Mailer::new(config.frontend_url.clone()),
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .nest("/api/auth", auth::router())
        .nest("/api/chat", chat::api_router())
        .nest("/api/news", news::news_router())
        .nest("/api/posts", news::posts_router())
        .nest("/api/newsletter", newsletter::router())
        .merge(chat::ws_router())
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
