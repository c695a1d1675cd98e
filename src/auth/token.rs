use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    config::{BCRYPT_COSTS, MAX_JWT_EXPIRY_HOURS},
    db::User,
};

use super::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks the HS256 tokens clients present on every request
/// and at the WebSocket handshake.
#[derive(Clone)]
pub struct IdentityProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry: Duration,
    bcrypt_cost: u32,
}

impl IdentityProvider {
    /// Out-of-range settings are clamped to what the config layer accepts.
    pub fn new(secret: &str, expiry_hours: i64, bcrypt_cost: u32) -> Self {
        IdentityProvider {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            expiry: Duration::hours(expiry_hours.clamp(1, MAX_JWT_EXPIRY_HOURS)),
            bcrypt_cost: bcrypt_cost.clamp(*BCRYPT_COSTS.start(), *BCRYPT_COSTS.end()),
        }
    }

    pub fn bcrypt_cost(&self) -> u32 {
        self.bcrypt_cost
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        self.sign(&Claims {
            sub: user.id,
            username: user.username.clone(),
            iat: now.unix_timestamp(),
            exp: (now + self.expiry).unix_timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected credential");
                AuthError::InvalidCredential
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::now_v7(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let provider = IdentityProvider::new("s3cret", 24, 4);
        let user = user();
        let claims = provider.verify(&provider.issue(&user).unwrap()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        let ours = IdentityProvider::new("s3cret", 24, 4);
        let theirs = IdentityProvider::new("other", 24, 4);
        let token = theirs.issue(&user()).unwrap();
        assert!(matches!(ours.verify(&token), Err(AuthError::InvalidCredential)));
        assert!(matches!(ours.verify("garbage"), Err(AuthError::InvalidCredential)));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let provider = IdentityProvider::new("s3cret", 24, 4);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = provider
            .sign(&Claims {
                sub: Uuid::now_v7(),
                username: "alice".into(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert!(matches!(provider.verify(&token), Err(AuthError::InvalidCredential)));
    }

    #[test]
    fn extreme_settings_are_clamped() {
        let provider = IdentityProvider::new("s3cret", i64::MAX, 99);
        assert_eq!(provider.bcrypt_cost(), 31);
        let claims = provider.verify(&provider.issue(&user()).unwrap()).unwrap();
        assert_eq!(claims.exp - claims.iat, MAX_JWT_EXPIRY_HOURS * 3600);

        let provider = IdentityProvider::new("s3cret", -5, 0);
        assert_eq!(provider.bcrypt_cost(), 4);
        assert!(provider.verify(&provider.issue(&user()).unwrap()).is_ok());
    }
}
