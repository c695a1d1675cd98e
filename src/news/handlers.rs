use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::{AuthError, CurrentUser},
    db, AppResult, AppState,
};

use super::{
    articles::{validate_comment, Article, ArticlePatch, Comment, Draft, Listing, PageRequest, PostListing},
    store::{self, ListFilter},
    ContentError,
};

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
    category: Option<String>,
    search: Option<String>,
}

impl ListQuery {
    fn page(&self) -> PageRequest {
        PageRequest::parse(self.page.as_deref(), self.limit.as_deref())
    }
}

#[derive(Serialize)]
pub(crate) struct Deleted {
    message: &'static str,
}

#[derive(Serialize)]
pub(crate) struct Likes {
    likes: u32,
}

#[derive(Deserialize)]
pub(crate) struct CommentRequest {
    #[serde(default)]
    content: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_news(
    State(db_pool): State<SqlitePool>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Listing>> {
    let page = query.page();
    let filter = ListFilter::new(None, query.category, query.search);
    let (news, total) = store::list(&db_pool, &filter, page).await?;
    Ok(Json(Listing {
        news,
        page: page.info(total),
    }))
}

/// Only the caller's own articles; category and search are not applied.
#[debug_handler(state = AppState)]
pub(crate) async fn list_posts(
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<PostListing>> {
    let page = query.page();
    let filter = ListFilter::new(Some(claims.sub), None, None);
    let (posts, total) = store::list(&db_pool, &filter, page).await?;
    Ok(Json(PostListing {
        posts,
        page: page.info(total),
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_article(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Article>> {
    let article = store::find_with_comments(&db_pool, id)
        .await?
        .ok_or(ContentError::ArticleNotFound)?;
    Ok(Json(article))
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Json(draft): Json<Draft>,
) -> AppResult<(StatusCode, Json<Article>)> {
    let draft = draft.validate()?;
    if db::find_user(&db_pool, claims.sub).await?.is_none() {
        return Err(AuthError::UserNotFound)?;
    }

    let article = store::insert(&db_pool, claims.sub, &draft).await?;
    tracing::info!(article_id = %article.id, author = %claims.username, "published article");
    Ok((StatusCode::CREATED, Json(article)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn patch_article(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<Json<Article>> {
    Ok(Json(patch_owned(&db_pool, id, claims.sub, body, ContentError::ArticleNotFound).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn patch_post(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<Json<Article>> {
    Ok(Json(patch_owned(&db_pool, id, claims.sub, body, ContentError::PostNotFound).await?))
}

/// Ownership is checked before the body, so strangers always see `missing`.
async fn patch_owned(
    db_pool: &SqlitePool,
    id: Uuid,
    author: Uuid,
    body: Map<String, Value>,
    missing: ContentError,
) -> anyhow::Result<Article> {
    let current = store::find_owned(db_pool, id, author).await?.ok_or(missing)?;
    let draft = ArticlePatch::from_body(body)?.apply(Draft::from(&current))?;
    let article = store::update(db_pool, id, &draft)
        .await?
        .ok_or(ContentError::ArticleNotFound)?;
    tracing::debug!(article_id = %id, "updated article");
    Ok(article)
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_article(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Deleted>> {
    if !store::delete_owned(&db_pool, id, claims.sub).await? {
        return Err(ContentError::ArticleNotFound)?;
    }
    tracing::info!(article_id = %id, author = %claims.username, "deleted article");
    Ok(Json(Deleted {
        message: "News article deleted successfully",
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_post(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Deleted>> {
    if !store::delete_owned(&db_pool, id, claims.sub).await? {
        return Err(ContentError::PostNotFound)?;
    }
    tracing::info!(article_id = %id, author = %claims.username, "deleted post");
    Ok(Json(Deleted {
        message: "Post deleted successfully",
    }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn comment(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
    Json(CommentRequest { content }): Json<CommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    if store::find(&db_pool, id).await?.is_none() {
        return Err(ContentError::ArticleNotFound)?;
    }
    let content = validate_comment(&content)?;
    let comment = store::insert_comment(&db_pool, id, claims.sub, &content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn like(
    Path(id): Path<Uuid>,
    CurrentUser(claims): CurrentUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Likes>> {
    if store::find(&db_pool, id).await?.is_none() {
        return Err(ContentError::ArticleNotFound)?;
    }
    let likes = store::toggle_like(&db_pool, id, claims.sub).await?;
    Ok(Json(Likes { likes }))
}
