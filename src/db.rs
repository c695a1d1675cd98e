use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY NOT NULL,
        room TEXT NOT NULL,
        user_id TEXT NOT NULL,
        username TEXT NOT NULL,
        message TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS chat_messages_room_timestamp ON chat_messages (room, timestamp DESC)",
    "CREATE TABLE IF NOT EXISTS news (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        category TEXT NOT NULL,
        tags TEXT NOT NULL,
        image_url TEXT,
        author_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS news_author ON news (author_id)",
    "CREATE TABLE IF NOT EXISTS news_comments (
        id TEXT PRIMARY KEY NOT NULL,
        news_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS news_comments_news ON news_comments (news_id)",
    "CREATE TABLE IF NOT EXISTS news_likes (
        news_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (news_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS newsletter_subscribers (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL UNIQUE,
        is_verified INTEGER NOT NULL DEFAULT 0,
        verification_token TEXT UNIQUE,
        frequency TEXT NOT NULL,
        categories TEXT NOT NULL,
        subscribed_at TEXT NOT NULL,
        last_email_sent TEXT
    )",
];

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
}

/// A private in-memory database. Pinned to one connection that never
/// expires, since every SQLite `:memory:` connection is its own database.
pub async fn in_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    created_at: String,
}

impl TryFrom<UserRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: Uuid::parse_str(&row.id).map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
        })
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

pub async fn insert_user(
    db_pool: &SqlitePool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, sqlx::Error> {
    let user = User {
        id: Uuid::now_v7(),
        username: username.to_owned(),
        email: email.to_owned(),
        password_hash: password_hash.to_owned(),
        created_at: now_rfc3339(),
    };

    sqlx::query("INSERT INTO users (id,username,email,password_hash,created_at) VALUES (?,?,?,?,?)")
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.created_at)
        .execute(db_pool)
        .await?;

    Ok(user)
}

pub async fn find_user(db_pool: &SqlitePool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT id,username,email,password_hash,created_at FROM users WHERE id=?")
        .bind(user_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .map(User::try_from)
        .transpose()
}

pub async fn find_user_by_email(db_pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT id,username,email,password_hash,created_at FROM users WHERE email=?")
        .bind(email)
        .fetch_optional(db_pool)
        .await?
        .map(User::try_from)
        .transpose()
}

pub async fn username_or_email_taken(
    db_pool: &SqlitePool,
    username: &str,
    email: &str,
) -> Result<bool, sqlx::Error> {
    Ok(sqlx::query("SELECT 1 FROM users WHERE username=? OR email=?")
        .bind(username)
        .bind(email)
        .fetch_optional(db_pool)
        .await?
        .is_some())
}

pub async fn delete_user(db_pool: &SqlitePool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM users WHERE id=?")
        .bind(user_id.to_string())
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let pool = pool().await;
        init_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn insert_then_find() {
        let pool = pool().await;
        let user = insert_user(&pool, "alice", "alice@example.com", "hash").await.unwrap();

        assert_eq!(find_user(&pool, user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            find_user_by_email(&pool, "alice@example.com").await.unwrap(),
            Some(user)
        );
        assert_eq!(find_user(&pool, Uuid::now_v7()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicates_are_detected() {
        let pool = pool().await;
        insert_user(&pool, "alice", "alice@example.com", "hash").await.unwrap();

        assert!(username_or_email_taken(&pool, "alice", "other@example.com").await.unwrap());
        assert!(username_or_email_taken(&pool, "bob", "alice@example.com").await.unwrap());
        assert!(!username_or_email_taken(&pool, "bob", "bob@example.com").await.unwrap());

        let err = insert_user(&pool, "alice", "x@example.com", "hash").await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(ref db) if db.is_unique_violation()));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went() {
        let pool = pool().await;
        let user = insert_user(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        assert!(delete_user(&pool, user.id).await.unwrap());
        assert!(!delete_user(&pool, user.id).await.unwrap());
        assert_eq!(find_user(&pool, user.id).await.unwrap(), None);
    }
}
