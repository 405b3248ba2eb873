use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::storage::{CommentId, CommentRecord};

/// Server-assigned article identity.
pub type ArticleId = i64;

/// Author name used when the server returns a comment without a username.
pub const DEFAULT_AUTHOR_NAME: &str = "User";

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by a [`RemoteDataSource`](super::RemoteDataSource).
///
/// These cover transport failures, HTTP status mapping, and malformed
/// payloads. Callers decide the disposition; nothing here mutates sync state.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// No response within the configured request timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    /// Non-2xx response that has no more specific mapping
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// 401/403, or a write attempted without a token
    #[error("Authentication required")]
    Unauthenticated,
    /// Article or comment does not exist
    #[error("Not found")]
    NotFound,
    /// Server answered `success: false`
    #[error("Server rejected request: {0}")]
    Rejected(String),
    /// Body was not the expected JSON shape
    #[error("Invalid response: {0}")]
    Parse(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

// ============================================================================
// Feed Types
// ============================================================================

/// The filter tuple that defines one feed epoch.
///
/// Both parts are normalized on construction: surrounding whitespace is
/// trimmed and an empty string means "no filter". A search term takes
/// precedence over a category when querying the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterKey {
    search_term: Option<String>,
    category: Option<String>,
}

/// Which server listing a [`FilterKey`] maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Home,
    Category,
    Search,
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl FilterKey {
    pub fn new(search_term: Option<&str>, category: Option<&str>) -> Self {
        Self {
            search_term: normalize(search_term),
            category: normalize(category),
        }
    }

    /// Unfiltered home feed.
    pub fn home() -> Self {
        Self::default()
    }

    pub fn search(term: &str) -> Self {
        Self::new(Some(term), None)
    }

    pub fn category(category: &str) -> Self {
        Self::new(None, Some(category))
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search_term.as_deref()
    }

    pub fn category_name(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn kind(&self) -> FeedKind {
        match (&self.search_term, &self.category) {
            (Some(_), _) => FeedKind::Search,
            (None, Some(_)) => FeedKind::Category,
            (None, None) => FeedKind::Home,
        }
    }
}

/// One page request: filter plus window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub filter: FilterKey,
    pub limit: usize,
    pub offset: usize,
}

/// Article as it appears in a feed listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSummary {
    pub id: ArticleId,
    pub title: String,
    pub category: Option<String>,
    pub topics: Vec<String>,
    pub cover: Option<String>,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub likes: u64,
    pub views: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Full article as returned by the detail endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub summary: ArticleSummary,
    pub content: String,
    pub collects: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of a listing.
///
/// `fetched` is how many rows the server returned, which can exceed
/// `items.len()` when rows were filtered out client-side. Offsets and
/// exhaustion are computed from it. `has_more` is the server's explicit
/// flag when it sent one; `None` means the caller infers exhaustion from
/// `fetched`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<ArticleSummary>,
    pub fetched: usize,
    pub has_more: Option<bool>,
}

impl Page {
    pub fn new(items: Vec<ArticleSummary>, has_more: Option<bool>) -> Self {
        Self {
            fetched: items.len(),
            items,
            has_more,
        }
    }

    /// Drop items that fail `keep`. `fetched` is unchanged.
    pub fn retain(mut self, keep: impl FnMut(&ArticleSummary) -> bool) -> Self {
        self.items.retain(keep);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Common response envelope: `{ success, message?, <payload> }`.
///
/// Every endpoint uses the same shape with a different payload key, so one
/// lenient struct covers them all.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiEnvelope {
    pub success: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub list: Vec<WireArticle>,
    pub has_more: Option<bool>,
    pub article: Option<WireArticle>,
    #[serde(default)]
    pub comments: Vec<WireComment>,
    pub comment: Option<WireComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireArticle {
    pub article_id: ArticleId,
    #[serde(default)]
    pub article_title: String,
    pub article_content: Option<String>,
    pub article_cover: Option<String>,
    pub article_category: Option<String>,
    /// Either a JSON array or a JSON-encoded string of one
    #[serde(default)]
    pub article_topics: serde_json::Value,
    pub article_likes: Option<u64>,
    pub article_collects: Option<u64>,
    pub article_views: Option<u64>,
    pub article_created_at: Option<String>,
    pub article_updated_at: Option<String>,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireComment {
    pub comment_id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub comment_content: Option<String>,
    pub comment_likes: Option<u64>,
    pub comment_created_at: Option<String>,
}

/// Parse a server timestamp, accepting RFC 3339 or `YYYY-MM-DD HH:MM:SS`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            tracing::debug!(raw = %raw, error = %e, "Unparseable timestamp from server");
            None
        }
    }
}

fn parse_topics(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(encoded) => {
            serde_json::from_str::<Vec<String>>(encoded).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to parse articleTopics string");
                Vec::new()
            })
        }
        _ => Vec::new(),
    }
}

impl WireArticle {
    pub(crate) fn into_summary(self) -> ArticleSummary {
        self.split().0
    }

    pub(crate) fn into_article(self) -> Article {
        let (summary, content, collects, updated_at) = self.split();
        Article {
            summary,
            content: content.unwrap_or_default(),
            collects,
            updated_at,
        }
    }

    fn split(self) -> (ArticleSummary, Option<String>, u64, Option<DateTime<Utc>>) {
        let summary = ArticleSummary {
            id: self.article_id,
            title: self.article_title,
            category: self.article_category,
            topics: parse_topics(&self.article_topics),
            cover: self.article_cover.filter(|c| !c.is_empty()),
            author_id: self.user_id,
            author_name: self.user_name,
            likes: self.article_likes.unwrap_or(0),
            views: self.article_views.unwrap_or(0),
            created_at: self.article_created_at.as_deref().and_then(parse_timestamp),
        };
        let updated_at = self.article_updated_at.as_deref().and_then(parse_timestamp);
        (
            summary,
            self.article_content,
            self.article_collects.unwrap_or(0),
            updated_at,
        )
    }
}

impl WireComment {
    pub(crate) fn into_record(self) -> CommentRecord {
        CommentRecord {
            id: CommentId::server(self.comment_id),
            correlation_id: None,
            author_id: self.user_id,
            author_name: self
                .username
                .unwrap_or_else(|| DEFAULT_AUTHOR_NAME.to_string()),
            author_avatar: self.avatar,
            body: self.comment_content.unwrap_or_default(),
            created_at: self
                .comment_created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
            like_count: self.comment_likes.unwrap_or(0),
            pending: false,
            local_only: false,
        }
    }
}
