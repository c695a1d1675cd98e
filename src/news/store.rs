use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;

use super::articles::{Article, Author, Comment, Draft, PageRequest};

const ARTICLE_COLUMNS: &str = "n.id, n.title, n.content, n.category, n.tags, n.image_url, n.author_id, u.username, \
     (SELECT COUNT(*) FROM news_likes l WHERE l.news_id = n.id) AS likes, n.created_at, n.updated_at \
     FROM news n LEFT JOIN users u ON u.id = n.author_id";

/// Narrows a listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub author: Option<Uuid>,
    /// Matched case-insensitively.
    pub category: Option<String>,
    /// Substring of the title or the content, case-insensitive.
    pub search: Option<String>,
}

impl ListFilter {
    /// Treats blank query values as absent.
    pub fn new(author: Option<Uuid>, category: Option<String>, search: Option<String>) -> ListFilter {
        let present = |value: Option<String>| value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        ListFilter {
            author,
            category: present(category),
            search: present(search),
        }
    }

    fn like_pattern(&self) -> Option<String> {
        let search = self.search.as_deref()?;
        let mut pattern = String::with_capacity(search.len() + 2);
        pattern.push('%');
        for c in search.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Some(pattern)
    }
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    title: String,
    content: String,
    category: String,
    tags: String,
    image_url: Option<String>,
    author_id: String,
    username: Option<String>,
    likes: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ArticleRow> for Article {
    type Error = sqlx::Error;

    fn try_from(row: ArticleRow) -> Result<Self, Self::Error> {
        Ok(Article {
            id: parse_id(&row.id)?,
            title: row.title,
            content: row.content,
            category: row.category,
            tags: serde_json::from_str(&row.tags).map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
            image_url: row.image_url,
            author: Author {
                id: parse_id(&row.author_id)?,
                username: row.username,
            },
            likes: u32::try_from(row.likes).unwrap_or(u32::MAX),
            comments: None,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: String,
    user_id: String,
    username: Option<String>,
    content: String,
    created_at: String,
}

impl TryFrom<CommentRow> for Comment {
    type Error = sqlx::Error;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        Ok(Comment {
            id: parse_id(&row.id)?,
            user: Author {
                id: parse_id(&row.user_id)?,
                username: row.username,
            },
            content: row.content,
            created_at: row.created_at,
        })
    }
}

fn parse_id(id: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(id).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

fn encode_tags(tags: &[String]) -> Result<String, sqlx::Error> {
    serde_json::to_string(tags).map_err(|err| sqlx::Error::Encode(Box::new(err)))
}

pub async fn insert(db_pool: &SqlitePool, author: Uuid, draft: &Draft) -> Result<Article, sqlx::Error> {
    let id = Uuid::now_v7();
    let now = db::now_rfc3339();
    sqlx::query(
        "INSERT INTO news (id,title,content,category,tags,image_url,author_id,created_at,updated_at) \
         VALUES (?,?,?,?,?,?,?,?,?)",
    )
    .bind(id.to_string())
    .bind(&draft.title)
    .bind(&draft.content)
    .bind(&draft.category)
    .bind(encode_tags(&draft.tags)?)
    .bind(&draft.image_url)
    .bind(author.to_string())
    .bind(&now)
    .bind(&now)
    .execute(db_pool)
    .await?;

    find(db_pool, id).await?.ok_or(sqlx::Error::RowNotFound)
}

/// Newest first.
pub async fn list(db_pool: &SqlitePool, filter: &ListFilter, page: PageRequest) -> Result<(Vec<Article>, u64), sqlx::Error> {
    const WHERE: &str = "WHERE (? IS NULL OR n.author_id = ?) \
         AND (? IS NULL OR lower(n.category) = lower(?)) \
         AND (? IS NULL OR n.title LIKE ? ESCAPE '\\' OR n.content LIKE ? ESCAPE '\\')";

    let author = filter.author.map(|id| id.to_string());
    let pattern = filter.like_pattern();

    let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM news n {WHERE}"))
        .bind(&author)
        .bind(&author)
        .bind(&filter.category)
        .bind(&filter.category)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_one(db_pool)
        .await?;

    // ids are UUIDv7, so they sort by creation time
    let rows: Vec<ArticleRow> = sqlx::query_as(&format!(
        "SELECT {ARTICLE_COLUMNS} {WHERE} ORDER BY n.id DESC LIMIT ? OFFSET ?"
    ))
    .bind(&author)
    .bind(&author)
    .bind(&filter.category)
    .bind(&filter.category)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(i64::from(page.limit))
    .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
    .fetch_all(db_pool)
    .await?;

    let articles = rows.into_iter().map(Article::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok((articles, u64::try_from(total).unwrap_or_default()))
}

pub async fn find(db_pool: &SqlitePool, id: Uuid) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query_as::<_, ArticleRow>(&format!("SELECT {ARTICLE_COLUMNS} WHERE n.id = ?"))
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?
        .map(Article::try_from)
        .transpose()
}

/// The article only if `author` wrote it.
pub async fn find_owned(db_pool: &SqlitePool, id: Uuid, author: Uuid) -> Result<Option<Article>, sqlx::Error> {
    Ok(find(db_pool, id).await?.filter(|article| article.author.id == author))
}

/// The article with its comments, oldest comment first.
pub async fn find_with_comments(db_pool: &SqlitePool, id: Uuid) -> Result<Option<Article>, sqlx::Error> {
    let Some(mut article) = find(db_pool, id).await? else {
        return Ok(None);
    };
    let rows: Vec<CommentRow> = sqlx::query_as(
        "SELECT c.id, c.user_id, u.username, c.content, c.created_at \
         FROM news_comments c LEFT JOIN users u ON u.id = c.user_id \
         WHERE c.news_id = ? ORDER BY c.id",
    )
    .bind(id.to_string())
    .fetch_all(db_pool)
    .await?;
    article.comments = Some(rows.into_iter().map(Comment::try_from).collect::<Result<_, _>>()?);
    Ok(Some(article))
}

pub async fn update(db_pool: &SqlitePool, id: Uuid, draft: &Draft) -> Result<Option<Article>, sqlx::Error> {
    sqlx::query("UPDATE news SET title=?, content=?, category=?, tags=?, image_url=?, updated_at=? WHERE id=?")
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.category)
        .bind(encode_tags(&draft.tags)?)
        .bind(&draft.image_url)
        .bind(db::now_rfc3339())
        .bind(id.to_string())
        .execute(db_pool)
        .await?;
    find(db_pool, id).await
}

/// Removes an article along with its comments and likes. Returns false when
/// `author` has no such article.
pub async fn delete_owned(db_pool: &SqlitePool, id: Uuid, author: Uuid) -> Result<bool, sqlx::Error> {
    let mut tx = db_pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM news WHERE id=? AND author_id=?")
        .bind(id.to_string())
        .bind(author.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Ok(false);
    }
    for table in ["news_comments", "news_likes"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE news_id=?"))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(true)
}

pub async fn insert_comment(db_pool: &SqlitePool, news_id: Uuid, user: Uuid, content: &str) -> Result<Comment, sqlx::Error> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO news_comments (id,news_id,user_id,content,created_at) VALUES (?,?,?,?,?)")
        .bind(id.to_string())
        .bind(news_id.to_string())
        .bind(user.to_string())
        .bind(content)
        .bind(db::now_rfc3339())
        .execute(db_pool)
        .await?;

    sqlx::query_as::<_, CommentRow>(
        "SELECT c.id, c.user_id, u.username, c.content, c.created_at \
         FROM news_comments c LEFT JOIN users u ON u.id = c.user_id WHERE c.id = ?",
    )
    .bind(id.to_string())
    .fetch_one(db_pool)
    .await
    .and_then(Comment::try_from)
}

/// Likes the article for `user`, or takes an existing like back. Returns the
/// new like count.
pub async fn toggle_like(db_pool: &SqlitePool, news_id: Uuid, user: Uuid) -> Result<u32, sqlx::Error> {
    let mut tx = db_pool.begin().await?;
    let unliked = sqlx::query("DELETE FROM news_likes WHERE news_id=? AND user_id=?")
        .bind(news_id.to_string())
        .bind(user.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if unliked == 0 {
        sqlx::query("INSERT INTO news_likes (news_id,user_id) VALUES (?,?)")
            .bind(news_id.to_string())
            .bind(user.to_string())
            .execute(&mut *tx)
            .await?;
    }
    let (likes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM news_likes WHERE news_id=?")
        .bind(news_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(u32::try_from(likes).unwrap_or(u32::MAX))
}
