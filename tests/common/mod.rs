//! Scripted in-process remote shared by the integration tests.

#![allow(dead_code)]

use chrono::Utc;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use iblog_sync::remote::{
    Article, ArticleId, ArticleSummary, FilterKey, Page, RemoteDataSource, RemoteError,
};
use iblog_sync::storage::{CommentId, CommentRecord, Database, PersistedCommentCache};
use iblog_sync::{Identity, SessionContext, SyncSettings};

/// Remote backed by in-memory catalogs, with switches for outages and
/// rejected writes. Every list call is counted.
#[derive(Default)]
pub struct FakeRemote {
    catalogs: Mutex<HashMap<FilterKey, Vec<ArticleSummary>>>,
    comments: Mutex<HashMap<ArticleId, Vec<CommentRecord>>>,
    offline: AtomicBool,
    reject_writes: AtomicBool,
    next_comment_id: AtomicI64,
    list_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            next_comment_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    pub fn with_catalog(self, filter: FilterKey, ids: &[ArticleId]) -> Self {
        self.catalogs
            .lock()
            .unwrap()
            .insert(filter, ids.iter().copied().map(article).collect());
        self
    }

    pub fn with_comments(self, article_id: ArticleId, records: Vec<CommentRecord>) -> Self {
        self.comments.lock().unwrap().insert(article_id, records);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn remote_comments(&self, article_id: ArticleId) -> Vec<CommentRecord> {
        self.comments
            .lock()
            .unwrap()
            .get(&article_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::HttpStatus(503))
        } else {
            Ok(())
        }
    }
}

impl RemoteDataSource for FakeRemote {
    async fn list_articles(
        &self,
        filter: &FilterKey,
        limit: usize,
        offset: usize,
    ) -> Result<Page, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let catalogs = self.catalogs.lock().unwrap();
        let items = catalogs
            .get(filter)
            .map(|all| all.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(Page::new(items, None))
    }

    async fn get_article(&self, article_id: ArticleId) -> Result<Article, RemoteError> {
        self.check_online()?;
        Ok(Article {
            summary: article(article_id),
            content: "body".to_string(),
            collects: 0,
            updated_at: None,
        })
    }

    async fn get_article_comments(
        &self,
        article_id: ArticleId,
    ) -> Result<Vec<CommentRecord>, RemoteError> {
        self.check_online()?;
        Ok(self.remote_comments(article_id))
    }

    async fn create_comment(
        &self,
        article_id: ArticleId,
        body: &str,
        auth_token: Option<&SecretString>,
    ) -> Result<CommentRecord, RemoteError> {
        self.check_online()?;
        if auth_token.is_none() {
            return Err(RemoteError::Unauthenticated);
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("Comment rejected".to_string()));
        }

        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst);
        let mut record = comment(id, body);
        record.author_id = Some(7);
        record.author_name = "alice".to_string();
        self.comments
            .lock()
            .unwrap()
            .entry(article_id)
            .or_default()
            .insert(0, record.clone());
        Ok(record)
    }

    async fn like_comment(
        &self,
        comment_id: &CommentId,
        _auth_token: Option<&SecretString>,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("Like rejected".to_string()));
        }

        let mut comments = self.comments.lock().unwrap();
        let record = comments
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|r| &r.id == comment_id)
            .ok_or(RemoteError::NotFound)?;
        record.like_count += 1;
        Ok(())
    }
}

pub fn article(id: ArticleId) -> ArticleSummary {
    ArticleSummary {
        id,
        title: format!("Article {}", id),
        category: None,
        topics: Vec::new(),
        cover: None,
        author_id: Some(1),
        author_name: Some("author".to_string()),
        likes: 0,
        views: 0,
        created_at: None,
    }
}

pub fn comment(id: i64, body: &str) -> CommentRecord {
    CommentRecord {
        id: CommentId::server(id),
        correlation_id: None,
        author_id: Some(1),
        author_name: "bob".to_string(),
        author_avatar: None,
        body: body.to_string(),
        created_at: Utc::now(),
        like_count: 0,
        pending: false,
        local_only: false,
    }
}

pub fn settings(page_size: usize) -> SyncSettings {
    SyncSettings {
        page_size,
        scroll_prefetch_margin: 2,
        request_timeout: Duration::from_secs(5),
        comment_load_delay: Duration::ZERO,
        cache_capacity: 16,
    }
}

pub fn anonymous_session() -> SessionContext {
    SessionContext::anonymous(settings(10))
}

pub fn signed_in_session() -> SessionContext {
    let session = SessionContext::anonymous(settings(10));
    session.sign_in(
        Identity {
            user_id: 7,
            username: "alice".to_string(),
            avatar: None,
        },
        SecretString::from("test-token"),
    );
    session
}

pub async fn test_cache() -> PersistedCommentCache {
    let db = Database::open(":memory:").await.unwrap();
    PersistedCommentCache::new(db, 16)
}
