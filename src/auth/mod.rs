//! Accounts and the credential the chat handshake checks.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{db::User, AppError, AppState};

mod login;
mod password;
mod profile;
mod register;
mod token;

pub use password::{hash_password, validate_password, verify_password};
pub(crate) use register::validate_email;
pub use token::{Claims, IdentityProvider};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register::register))
        .route("/login", post(login::login))
        .route("/profile", get(profile::profile))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication error")]
    MissingCredential,
    #[error("Authentication error")]
    InvalidCredential,
    #[error("Invalid email or password")]
    BadLogin,
    #[error("{0}")]
    Invalid(String),
    #[error("Username or email already registered")]
    Conflict,
    #[error("User not found")]
    UserNotFound,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        use AuthError::*;
        match self {
            MissingCredential | InvalidCredential | BadLogin => StatusCode::UNAUTHORIZED,
            Invalid(_) => StatusCode::BAD_REQUEST,
            Conflict => StatusCode::CONFLICT,
            UserNotFound => StatusCode::NOT_FOUND,
            Hashing(_) | Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The account as other users and the owner's own client see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

/// Pulls the token out of an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verified claims of the caller, for handlers behind bearer auth.
pub struct CurrentUser(pub Claims);

impl<S> FromRequestParts<S> for CurrentUser
where
    IdentityProvider: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let provider = IdentityProvider::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingCredential)?;
        Ok(CurrentUser(provider.verify(token)?))
    }
}
