use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AuthResponse, PublicUser};

use super::ClientError;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// The account endpoints plus where the chat socket lives.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<ApiClient, ClientError> {
        let base = Url::parse(server).map_err(|err| ClientError::InvalidUrl(err.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!("{server} is not an http(s) url")));
        }
        Ok(ApiClient {
            http: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    pub fn ws_url(&self, room: &str) -> Result<Url, ClientError> {
        let mut url = self.endpoint(&format!("/ws/{room}"));
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {}", self.base)))?;
        Ok(url)
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/api/auth/register"))
            .json(&json!({ "username": username, "email": email, "password": password }))
            .send()
            .await?;
        parse(response).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        parse(response).await
    }

    /// A token for a deleted account is as good as an invalid one.
    pub async fn profile(&self, token: &str) -> Result<PublicUser, ClientError> {
        let response = self
            .http
            .get(self.endpoint("/api/auth/profile"))
            .bearer_auth(token)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Err(ClientError::AuthRejected),
            _ => parse(response).await,
        }
    }
}

async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("request failed").to_owned());
    Err(ClientError::Server { status, message })
}
