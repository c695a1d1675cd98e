//! Tech news articles. `/api/news` is the public feed with comments and
//! likes; `/api/posts` is the same table scoped to the caller's own articles.

mod articles;
mod handlers;
mod store;

use axum::{
    http::StatusCode,
    routing::{get, patch, post},
    Router,
};
use thiserror::Error;

use crate::AppState;

pub use articles::{
    Article, ArticlePatch, Author, Comment, Draft, Listing, PageInfo, PageRequest, PostListing, PATCHABLE_FIELDS,
};
pub use store::ListFilter;

pub fn news_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_news).post(handlers::create))
        .route(
            "/{id}",
            get(handlers::get_article)
                .patch(handlers::patch_article)
                .delete(handlers::delete_article),
        )
        .route("/{id}/comments", post(handlers::comment))
        .route("/{id}/like", post(handlers::like))
}

pub fn posts_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_posts).post(handlers::create))
        .route("/{id}", patch(handlers::patch_post).delete(handlers::delete_post))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("News article not found")]
    ArticleNotFound,
    #[error("Post not found")]
    PostNotFound,
    #[error("Invalid updates")]
    InvalidUpdates,
    #[error("{0}")]
    Invalid(String),
}

impl ContentError {
    pub fn status(&self) -> StatusCode {
        match self {
            ContentError::ArticleNotFound | ContentError::PostNotFound => StatusCode::NOT_FOUND,
            ContentError::InvalidUpdates | ContentError::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_articles_are_not_found() {
        assert_eq!(ContentError::ArticleNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ContentError::PostNotFound.to_string(), "Post not found");
        assert_eq!(ContentError::InvalidUpdates.status(), StatusCode::BAD_REQUEST);
    }
}
