use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

use crate::{auth::AuthError, chat::ChatError, news::ContentError, newsletter::NewsletterError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<AuthError>() {
            return err.status();
        }
        if let Some(err) = self.0.downcast_ref::<ChatError>() {
            return err.status();
        }
        if let Some(err) = self.0.downcast_ref::<ContentError>() {
            return err.status();
        }
        if let Some(err) = self.0.downcast_ref::<NewsletterError>() {
            return err.status();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = ?self.0, "request failed");
            "Something broke!".to_owned()
        } else {
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_their_status() {
        let err = AppError::from(AuthError::InvalidCredential);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn chat_errors_keep_their_status() {
        let err = AppError::from(ChatError::InvalidRoom("no spaces".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn content_errors_keep_their_status() {
        assert_eq!(AppError::from(ContentError::InvalidUpdates).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(NewsletterError::InvalidToken).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_errors_are_internal() {
        let err = AppError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = AppError::from(anyhow::anyhow!("secret detail")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Something broke!");
    }
}
