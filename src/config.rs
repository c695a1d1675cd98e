//! Process configuration read from the environment (and `.env`).

use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://techxo.db?mode=rwc";
pub const DEFAULT_JWT_EXPIRY_HOURS: i64 = 24;
pub const DEFAULT_BCRYPT_COST: u32 = 12;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Longest token lifetime accepted, one year.
pub const MAX_JWT_EXPIRY_HOURS: i64 = 24 * 365;
/// What the bcrypt crate accepts.
pub const BCRYPT_COSTS: RangeInclusive<u32> = 4..=31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: &'static str,
        value: String,
        min: String,
        max: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub bcrypt_cost: u32,
    /// Base of the links sent in newsletter verification mails.
    pub frontend_url: String,
    pub chat: ChatConfig,
}

/// Tunables for the chat hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    /// Frames buffered per connection before it counts as a slow consumer
    /// and gets disconnected.
    pub outbox_capacity: usize,
    /// Report each user once even when they hold several connections.
    pub collapse_duplicate_presence: bool,
    /// Write relayed messages to `chat_messages`.
    pub persist_history: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            collapse_duplicate_presence: true,
            persist_history: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let outbox_capacity = bounded(&lookup, "OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY, 1..=1 << 20)?;

        Ok(Config {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parsed(&lookup, "PORT", DEFAULT_PORT)?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            jwt_secret,
            jwt_expiry_hours: bounded(
                &lookup,
                "JWT_EXPIRY_HOURS",
                DEFAULT_JWT_EXPIRY_HOURS,
                1..=MAX_JWT_EXPIRY_HOURS,
            )?,
            bcrypt_cost: bounded(&lookup, "BCRYPT_COST", DEFAULT_BCRYPT_COST, BCRYPT_COSTS)?,
            frontend_url: lookup("FRONTEND_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_FRONTEND_URL.to_owned()),
            chat: ChatConfig {
                outbox_capacity,
                collapse_duplicate_presence: flag(&lookup, "COLLAPSE_DUPLICATE_PRESENCE", true)?,
                persist_history: flag(&lookup, "PERSIST_HISTORY", false)?,
            },
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn bounded<T: FromStr + PartialOrd + Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError> {
    let value = parsed(lookup, key, default)?;
    if range.contains(&value) {
        return Ok(value);
    }
    Err(ConfigError::OutOfRange {
        key,
        value: value.to_string(),
        min: range.start().to_string(),
        max: range.end().to_string(),
    })
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.jwt_expiry_hours, 24);
        assert_eq!(config.bcrypt_cost, 12);
        assert_eq!(config.frontend_url, DEFAULT_FRONTEND_URL);
        assert_eq!(config.chat, ChatConfig::default());
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(config(&[]).unwrap_err(), ConfigError::Missing("JWT_SECRET"));
        assert_eq!(
            config(&[("JWT_SECRET", "")]).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("JWT_SECRET", "s3cret"),
            ("PORT", "8080"),
            ("OUTBOX_CAPACITY", "8"),
            ("COLLAPSE_DUPLICATE_PRESENCE", "off"),
            ("PERSIST_HISTORY", "TRUE"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chat.outbox_capacity, 8);
        assert!(!config.chat.collapse_duplicate_presence);
        assert!(config.chat.persist_history);
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = config(&[("JWT_SECRET", "s3cret"), ("PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".into()
            }
        );

        let err = config(&[("JWT_SECRET", "s3cret"), ("PERSIST_HISTORY", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PERSIST_HISTORY", .. }));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = config(&[("JWT_SECRET", "s3cret"), ("OUTBOX_CAPACITY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "OUTBOX_CAPACITY", .. }));
    }

    #[test]
    fn bcrypt_cost_must_be_usable() {
        let err = config(&[("JWT_SECRET", "s3cret"), ("BCRYPT_COST", "99")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                key: "BCRYPT_COST",
                value: "99".into(),
                min: "4".into(),
                max: "31".into(),
            }
        );
        assert!(config(&[("JWT_SECRET", "s3cret"), ("BCRYPT_COST", "3")]).is_err());
        assert_eq!(
            config(&[("JWT_SECRET", "s3cret"), ("BCRYPT_COST", "4")]).unwrap().bcrypt_cost,
            4
        );
    }

    #[test]
    fn token_expiry_must_be_positive_and_sane() {
        for hours in ["-5", "0", "9223372036854775807"] {
            let err = config(&[("JWT_SECRET", "s3cret"), ("JWT_EXPIRY_HOURS", hours)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::OutOfRange { key: "JWT_EXPIRY_HOURS", .. }),
                "{hours} was accepted"
            );
        }
        let config = config(&[("JWT_SECRET", "s3cret"), ("JWT_EXPIRY_HOURS", "8760")]).unwrap();
        assert_eq!(config.jwt_expiry_hours, MAX_JWT_EXPIRY_HOURS);
    }

    #[test]
    fn frontend_url_drops_trailing_slash() {
        let config = config(&[("JWT_SECRET", "s3cret"), ("FRONTEND_URL", "https://techxo.dev/")]).unwrap();
        assert_eq!(config.frontend_url, "https://techxo.dev");
    }
}
