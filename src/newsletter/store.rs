use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;

use super::{Frequency, Preferences, Subscriber};

const COLUMNS: &str = "id, email, is_verified, frequency, categories, subscribed_at, last_email_sent";

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    id: String,
    email: String,
    is_verified: bool,
    frequency: String,
    categories: String,
    subscribed_at: String,
    last_email_sent: Option<String>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = sqlx::Error;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        let decode = |err: Box<dyn std::error::Error + Send + Sync>| sqlx::Error::Decode(err);
        Ok(Subscriber {
            id: Uuid::parse_str(&row.id).map_err(|err| decode(Box::new(err)))?,
            email: row.email,
            is_verified: row.is_verified,
            preferences: Preferences {
                frequency: Frequency::parse(&row.frequency)
                    .ok_or_else(|| decode(format!("unknown frequency {:?}", row.frequency).into()))?,
                categories: serde_json::from_str(&row.categories).map_err(|err| decode(Box::new(err)))?,
            },
            subscribed_at: row.subscribed_at,
            last_email_sent: row.last_email_sent,
        })
    }
}

fn encode_categories(preferences: &Preferences) -> Result<String, sqlx::Error> {
    serde_json::to_string(&preferences.categories).map_err(|err| sqlx::Error::Encode(Box::new(err)))
}

pub async fn insert(
    db_pool: &SqlitePool,
    email: &str,
    preferences: &Preferences,
    verification_token: &str,
) -> Result<Subscriber, sqlx::Error> {
    let subscriber = Subscriber {
        id: Uuid::now_v7(),
        email: email.to_owned(),
        is_verified: false,
        preferences: preferences.clone(),
        subscribed_at: db::now_rfc3339(),
        last_email_sent: None,
    };
    sqlx::query(
        "INSERT INTO newsletter_subscribers \
         (id,email,is_verified,verification_token,frequency,categories,subscribed_at) VALUES (?,?,?,?,?,?,?)",
    )
    .bind(subscriber.id.to_string())
    .bind(&subscriber.email)
    .bind(false)
    .bind(verification_token)
    .bind(preferences.frequency.as_str())
    .bind(encode_categories(preferences)?)
    .bind(&subscriber.subscribed_at)
    .execute(db_pool)
    .await?;
    Ok(subscriber)
}

pub async fn find_by_email(db_pool: &SqlitePool, email: &str) -> Result<Option<Subscriber>, sqlx::Error> {
    sqlx::query_as::<_, SubscriberRow>(&format!("SELECT {COLUMNS} FROM newsletter_subscribers WHERE email=?"))
        .bind(email)
        .fetch_optional(db_pool)
        .await?
        .map(Subscriber::try_from)
        .transpose()
}

/// Marks the holder of `token` verified and burns the token.
pub async fn verify(db_pool: &SqlitePool, token: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE newsletter_subscribers SET is_verified=1, verification_token=NULL WHERE verification_token=?",
    )
    .bind(token)
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_preferences(
    db_pool: &SqlitePool,
    email: &str,
    preferences: &Preferences,
) -> Result<Option<Subscriber>, sqlx::Error> {
    let result = sqlx::query("UPDATE newsletter_subscribers SET frequency=?, categories=? WHERE email=?")
        .bind(preferences.frequency.as_str())
        .bind(encode_categories(preferences)?)
        .bind(email)
        .execute(db_pool)
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    find_by_email(db_pool, email).await
}

pub async fn delete(db_pool: &SqlitePool, email: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM newsletter_subscribers WHERE email=?")
        .bind(email)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newsletter::Category;

    async fn pool() -> SqlitePool {
        let pool = db::in_memory().await.unwrap();
        db::init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn verification_burns_the_token() {
        let pool = pool().await;
        insert(&pool, "carol@example.com", &Preferences::default(), "t0k3n").await.unwrap();

        assert!(verify(&pool, "t0k3n").await.unwrap());
        assert!(!verify(&pool, "t0k3n").await.unwrap());
        assert!(!verify(&pool, "").await.unwrap());

        let subscriber = find_by_email(&pool, "carol@example.com").await.unwrap().unwrap();
        assert!(subscriber.is_verified);
    }

    #[tokio::test]
    async fn emails_are_unique() {
        let pool = pool().await;
        insert(&pool, "carol@example.com", &Preferences::default(), "a").await.unwrap();
        let err = insert(&pool, "carol@example.com", &Preferences::default(), "b").await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(ref db) if db.is_unique_violation()));
    }

    #[tokio::test]
    async fn preferences_are_replaced() {
        let pool = pool().await;
        insert(&pool, "carol@example.com", &Preferences::default(), "a").await.unwrap();
        let preferences = Preferences {
            frequency: Frequency::Monthly,
            categories: vec![Category::Cybersecurity, Category::Ai],
        };

        let updated = update_preferences(&pool, "carol@example.com", &preferences).await.unwrap().unwrap();
        assert_eq!(updated.preferences, preferences);
        assert_eq!(update_preferences(&pool, "dave@example.com", &preferences).await.unwrap(), None);

        assert!(delete(&pool, "carol@example.com").await.unwrap());
        assert!(!delete(&pool, "carol@example.com").await.unwrap());
    }
}
