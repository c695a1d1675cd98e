//! Newsletter subscriptions with email verification and per-subscriber
//! delivery preferences.

mod mailer;
mod routes;
mod store;

use axum::{
    http::StatusCode,
    routing::{delete, get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::AppState;

pub use mailer::Mailer;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscribe", post(routes::subscribe))
        .route("/verify/{token}", get(routes::verify))
        .route("/preferences", patch(routes::preferences))
        .route("/unsubscribe", delete(routes::unsubscribe))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NewsletterError {
    #[error("Email already subscribed")]
    AlreadySubscribed,
    #[error("Invalid verification token")]
    InvalidToken,
    #[error("Subscription not found")]
    NotFound,
    #[error("{0}")]
    Invalid(String),
}

impl NewsletterError {
    pub fn status(&self) -> StatusCode {
        match self {
            NewsletterError::AlreadySubscribed | NewsletterError::Invalid(_) => StatusCode::BAD_REQUEST,
            NewsletterError::InvalidToken | NewsletterError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Frequency> {
        match value {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Technology,
    #[serde(rename = "AI")]
    Ai,
    Cybersecurity,
    Programming,
    Startups,
    Other,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl Preferences {
    /// Drops repeated categories, keeping the first mention.
    pub fn normalized(mut self) -> Preferences {
        let mut seen = Vec::with_capacity(self.categories.len());
        self.categories.retain(|category| {
            let fresh = !seen.contains(category);
            seen.push(*category);
            fresh
        });
        self
    }
}

/// A subscription as shown to its owner. The verification token never
/// leaves the server except by mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: Uuid,
    pub email: String,
    pub is_verified: bool,
    pub preferences: Preferences,
    pub subscribed_at: String,
    pub last_email_sent: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn preferences_default_to_weekly() {
        let preferences: Preferences = serde_json::from_value(json!({})).unwrap();
        assert_eq!(preferences.frequency, Frequency::Weekly);
        assert!(preferences.categories.is_empty());
    }

    #[test]
    fn categories_use_display_names() {
        let preferences: Preferences =
            serde_json::from_value(json!({"frequency": "daily", "categories": ["AI", "Startups", "AI"]})).unwrap();
        assert_eq!(preferences.clone().normalized().categories, [Category::Ai, Category::Startups]);
        assert_eq!(serde_json::to_value(preferences.normalized()).unwrap()["categories"], json!(["AI", "Startups"]));

        assert!(serde_json::from_value::<Preferences>(json!({"categories": ["Gardening"]})).is_err());
        assert!(serde_json::from_value::<Preferences>(json!({"frequency": "hourly"})).is_err());
    }

    #[test]
    fn frequencies_round_trip_through_storage() {
        for frequency in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
            assert_eq!(Frequency::parse(frequency.as_str()), Some(frequency));
        }
        assert_eq!(Frequency::parse("yearly"), None);
    }

    #[test]
    fn lookups_that_miss_are_not_found() {
        assert_eq!(NewsletterError::InvalidToken.status(), StatusCode::NOT_FOUND);
        assert_eq!(NewsletterError::AlreadySubscribed.status(), StatusCode::BAD_REQUEST);
    }
}
