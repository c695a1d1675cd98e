use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{db, AppResult, AppState};

use super::{hash_password, validate_password, AuthError, AuthResponse, IdentityProvider};

const MAX_USERNAME_LENGTH: usize = 32;

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn register(
    State(db_pool): State<SqlitePool>,
    State(provider): State<IdentityProvider>,
    Json(RegisterRequest { username, email, password }): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let username = validate_username(&username)?;
    let email = validate_email(&email)?;
    validate_password(&password)?;

    if db::username_or_email_taken(&db_pool, username, &email).await? {
        return Err(AuthError::Conflict)?;
    }

    let password_hash = hash_password(password, provider.bcrypt_cost()).await?;
    let user = match db::insert_user(&db_pool, username, &email, &password_hash).await {
        Ok(user) => user,
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            return Err(AuthError::Conflict)?;
        }
        Err(err) => return Err(err)?,
    };

    let token = provider.issue(&user)?;
    tracing::info!(user_id = %user.id, username = %user.username, "registered user");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

fn validate_username(username: &str) -> Result<&str, AuthError> {
    let username = username.trim();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AuthError::Invalid(format!(
            "Username must be 1 to {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(AuthError::Invalid("Username contains invalid characters".into()));
    }
    Ok(username)
}

/// Trimmed and lowercased, the way addresses are stored.
pub(crate) fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(AuthError::Invalid("Invalid email address".into()));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_trimmed_and_bounded() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("bad\nname").is_err());
    }

    #[test]
    fn emails_are_normalised() {
        assert_eq!(validate_email(" Alice@Example.COM ").unwrap(), "alice@example.com");
        assert!(validate_email("alice").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@localhost").is_err());
        assert!(validate_email("al ice@example.com").is_err());
    }
}
