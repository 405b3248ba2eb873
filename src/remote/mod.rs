//! Remote data source for the blog API.
//!
//! The sync layer never talks HTTP directly. It consumes the
//! [`RemoteDataSource`] trait, which exposes the five operations the client
//! needs: paged article listings, article detail, per-article comments,
//! comment creation, and comment likes.
//!
//! - [`types`] - Feed/article types, wire envelopes, and [`RemoteError`]
//! - [`http`] - [`HttpDataSource`], the `reqwest` implementation
//!
//! Implementations are stateless from the caller's point of view; ordering
//! and staleness are handled by the `sync` module.

mod http;
mod types;

use std::future::Future;

use secrecy::SecretString;

use crate::storage::{CommentId, CommentRecord};

pub use http::HttpDataSource;
pub use types::{
    Article, ArticleId, ArticleSummary, FeedKind, FilterKey, Page, PageRequest, RemoteError,
    DEFAULT_AUTHOR_NAME,
};

/// Request interface to the blog backend.
///
/// Futures must be `Send` so callers can either await them inline or hand
/// them to `tokio::spawn`.
pub trait RemoteDataSource: Send + Sync + 'static {
    /// List published articles, newest first, for the given filter window.
    fn list_articles(
        &self,
        filter: &FilterKey,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Page, RemoteError>> + Send;

    fn get_article(
        &self,
        article_id: ArticleId,
    ) -> impl Future<Output = Result<Article, RemoteError>> + Send;

    /// Comments for one article, newest first.
    fn get_article_comments(
        &self,
        article_id: ArticleId,
    ) -> impl Future<Output = Result<Vec<CommentRecord>, RemoteError>> + Send;

    /// Create a comment. Fails with [`RemoteError::Unauthenticated`] when the
    /// server requires a token and none (or an invalid one) was supplied.
    fn create_comment(
        &self,
        article_id: ArticleId,
        body: &str,
        auth_token: Option<&SecretString>,
    ) -> impl Future<Output = Result<CommentRecord, RemoteError>> + Send;

    /// Increment a comment's like count. [`RemoteError::NotFound`] when the
    /// comment does not exist.
    fn like_comment(
        &self,
        comment_id: &CommentId,
        auth_token: Option<&SecretString>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
