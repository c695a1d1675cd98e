use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ContentError;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_CATEGORY_LENGTH: usize = 64;
const MAX_CONTENT_LENGTH: usize = 50_000;
const MAX_COMMENT_LENGTH: usize = 2_000;
const MAX_TAGS: usize = 20;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// The only keys a PATCH body may carry.
pub const PATCHABLE_FIELDS: [&str; 5] = ["title", "content", "category", "tags", "imageUrl"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: Uuid,
    /// Gone when the account was deleted.
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub user: Author,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub author: Author,
    pub likes: u32,
    /// Only filled in when a single article is fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
    pub created_at: String,
    pub updated_at: String,
}

/// The writable part of an article, as created or after a patch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Draft {
    /// Trims every field and rejects what cannot be stored.
    pub fn validate(self) -> Result<Draft, ContentError> {
        let title = required("Title", &self.title, MAX_TITLE_LENGTH)?;
        let content = required("Content", &self.content, MAX_CONTENT_LENGTH)?;
        let category = required("Category", &self.category, MAX_CATEGORY_LENGTH)?;

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|seen| seen == tag) {
                tags.push(tag.to_owned());
            }
        }
        if tags.len() > MAX_TAGS {
            return Err(ContentError::Invalid(format!("At most {MAX_TAGS} tags are allowed")));
        }

        let image_url = self
            .image_url
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());

        Ok(Draft {
            title,
            content,
            category,
            tags,
            image_url,
        })
    }
}

impl From<&Article> for Draft {
    fn from(article: &Article) -> Self {
        Draft {
            title: article.title.clone(),
            content: article.content.clone(),
            category: article.category.clone(),
            tags: article.tags.clone(),
            image_url: article.image_url.clone(),
        }
    }
}

/// A partial update. An empty `imageUrl` removes the image.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePatch {
    title: Option<String>,
    content: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    image_url: Option<String>,
}

impl ArticlePatch {
    /// Rejects any key outside [`PATCHABLE_FIELDS`] before looking at values.
    pub fn from_body(body: Map<String, Value>) -> Result<ArticlePatch, ContentError> {
        if body.keys().any(|key| !PATCHABLE_FIELDS.contains(&key.as_str())) {
            return Err(ContentError::InvalidUpdates);
        }
        serde_json::from_value(Value::Object(body)).map_err(|err| ContentError::Invalid(err.to_string()))
    }

    pub fn apply(self, mut draft: Draft) -> Result<Draft, ContentError> {
        if let Some(title) = self.title {
            draft.title = title;
        }
        if let Some(content) = self.content {
            draft.content = content;
        }
        if let Some(category) = self.category {
            draft.category = category;
        }
        if let Some(tags) = self.tags {
            draft.tags = tags;
        }
        if let Some(image_url) = self.image_url {
            draft.image_url = Some(image_url);
        }
        draft.validate()
    }
}

pub fn validate_comment(content: &str) -> Result<String, ContentError> {
    required("Comment", content, MAX_COMMENT_LENGTH)
}

fn required(field: &str, value: &str, max: usize) -> Result<String, ContentError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ContentError::Invalid(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(ContentError::Invalid(format!("{field} must be at most {max} characters")));
    }
    Ok(value.to_owned())
}

/// Which slice of a listing to return. Unparseable or non-positive values
/// fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> PageRequest {
        let positive = |value: Option<&str>| value.and_then(|v| v.trim().parse::<u32>().ok()).filter(|n| *n > 0);
        PageRequest {
            page: positive(page).unwrap_or(1),
            limit: positive(limit).unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn info(&self, total_items: u64) -> PageInfo {
        PageInfo {
            current_page: self.page,
            total_pages: total_items.div_ceil(u64::from(self.limit)),
            total_items,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
}

/// One page of articles under the `news` key.
#[derive(Debug, Serialize, Deserialize)]
pub struct Listing {
    pub news: Vec<Article>,
    #[serde(flatten)]
    pub page: PageInfo,
}

/// One page of the caller's own articles under the `posts` key.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostListing {
    pub posts: Vec<Article>,
    #[serde(flatten)]
    pub page: PageInfo,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn draft() -> Draft {
        Draft {
            title: " Rust 2026 ".into(),
            content: "Editions keep coming.".into(),
            category: "Programming".into(),
            tags: vec!["rust".into(), " rust ".into(), "".into(), "lang".into()],
            image_url: Some("   ".into()),
        }
    }

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn drafts_are_trimmed() {
        let draft = draft().validate().unwrap();
        assert_eq!(draft.title, "Rust 2026");
        assert_eq!(draft.tags, ["rust", "lang"]);
        assert_eq!(draft.image_url, None);
    }

    #[test]
    fn drafts_need_title_content_and_category() {
        let err = Draft { title: "  ".into(), ..draft() }.validate().unwrap_err();
        assert_eq!(err, ContentError::Invalid("Title is required".into()));
        assert!(Draft { content: "".into(), ..draft() }.validate().is_err());
        assert!(Draft { category: "x".repeat(65), ..draft() }.validate().is_err());
    }

    #[test]
    fn patches_only_touch_allowed_fields() {
        let err = ArticlePatch::from_body(body(json!({"title": "ok", "author": "mallory"}))).unwrap_err();
        assert_eq!(err, ContentError::InvalidUpdates);

        let err = ArticlePatch::from_body(body(json!({"likes": 1000}))).unwrap_err();
        assert_eq!(err, ContentError::InvalidUpdates);

        let err = ArticlePatch::from_body(body(json!({"tags": "not a list"}))).unwrap_err();
        assert!(matches!(err, ContentError::Invalid(_)));
    }

    #[test]
    fn patches_merge_over_the_current_draft() {
        let current = draft().validate().unwrap();
        let patch = ArticlePatch::from_body(body(json!({"title": "Rust 2027", "imageUrl": "https://img/x.png"}))).unwrap();
        let next = patch.apply(current.clone()).unwrap();

        assert_eq!(next.title, "Rust 2027");
        assert_eq!(next.content, current.content);
        assert_eq!(next.image_url.as_deref(), Some("https://img/x.png"));

        let cleared = ArticlePatch::from_body(body(json!({"imageUrl": ""}))).unwrap().apply(next).unwrap();
        assert_eq!(cleared.image_url, None);

        let blanked = ArticlePatch::from_body(body(json!({"title": " "}))).unwrap().apply(current);
        assert!(blanked.is_err());
    }

    #[test]
    fn paging_falls_back_to_defaults() {
        assert_eq!(PageRequest::parse(None, None), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::parse(Some("abc"), Some("0")), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::parse(Some("3"), Some("5000")), PageRequest { page: 3, limit: 100 });
        assert_eq!(PageRequest::parse(Some("3"), Some("5")).offset(), 10);
    }

    #[test]
    fn total_pages_round_up() {
        let request = PageRequest { page: 1, limit: 10 };
        assert_eq!(request.info(0).total_pages, 0);
        assert_eq!(request.info(10).total_pages, 1);
        assert_eq!(request.info(11).total_pages, 2);

        let listing = serde_json::to_value(Listing { news: vec![], page: request.info(11) }).unwrap();
        assert_eq!(listing, json!({"news": [], "currentPage": 1, "totalPages": 2, "totalItems": 11}));
    }
}
