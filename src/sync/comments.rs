use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::generation::{DeferredTask, Generation, Tagged};
use crate::error::SyncError;
use crate::remote::{ArticleId, RemoteDataSource, RemoteError};
use crate::session::{AuthorContext, SessionContext};
use crate::storage::{CommentId, CommentRecord, PersistedCommentCache, Resolution};

/// Display name for comments written without a signed-in user.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

// ============================================================================
// Types
// ============================================================================

/// Per-article load lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    /// `stale` is true when the records came from the local cache after a
    /// failed fetch, even if the cache was empty.
    Loaded { stale: bool },
    /// The fetch failed. Only observable while the cache fallback is read;
    /// every failed load settles in `Loaded { stale: true }`.
    Error(String),
}

/// What the caller should render for one article.
///
/// Stale data and the error that made it stale are delivered together.
#[derive(Debug)]
pub struct CommentsView {
    pub article_id: ArticleId,
    pub records: Vec<CommentRecord>,
    pub stale: bool,
    pub error: Option<SyncError>,
    /// Pending comments whose submit was lost, e.g. the process exited
    /// before the server answered. They stay in `records` until
    /// [`CommentSyncEngine::resubmit`] or [`CommentSyncEngine::discard_pending`].
    pub orphaned: Vec<CommentRecord>,
}

/// A started comment load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub article_id: ArticleId,
    pub generation: Generation,
}

/// Remote answer for one article's comments.
#[derive(Debug)]
pub struct CommentFetch {
    pub article_id: ArticleId,
    pub result: Result<Vec<CommentRecord>, RemoteError>,
}

/// Result of `add`: what was shown locally and whether anything remains to
/// send.
#[derive(Debug)]
pub enum AddSubmission {
    /// Anonymous comment. Cached only, never sent.
    LocalOnly(CommentRecord),
    /// Optimistic record is cached; submit the comment to confirm it.
    Pending(PendingComment),
}

impl AddSubmission {
    pub fn record(&self) -> &CommentRecord {
        match self {
            AddSubmission::LocalOnly(record) => record,
            AddSubmission::Pending(pending) => &pending.record,
        }
    }
}

/// An optimistic comment awaiting its remote write.
#[derive(Debug)]
pub struct PendingComment {
    article_id: ArticleId,
    record: CommentRecord,
    token: Arc<SecretString>,
}

impl PendingComment {
    pub fn article_id(&self) -> ArticleId {
        self.article_id
    }

    pub fn record(&self) -> &CommentRecord {
        &self.record
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.record.correlation_id
    }

    pub async fn submit<R: RemoteDataSource>(self, remote: &R) -> AddResolution {
        let result = remote
            .create_comment(self.article_id, &self.record.body, Some(self.token.as_ref()))
            .await;
        AddResolution {
            article_id: self.article_id,
            pending: self.record,
            result,
        }
    }
}

/// Remote outcome of a [`PendingComment`].
#[derive(Debug)]
pub struct AddResolution {
    article_id: ArticleId,
    pending: CommentRecord,
    result: Result<CommentRecord, RemoteError>,
}

impl AddResolution {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// An optimistic like awaiting its remote call.
#[derive(Debug, Clone)]
pub struct LikeTicket {
    article_id: ArticleId,
    comment_id: CommentId,
    /// Cached count before the optimistic bump
    before: u64,
    token: Option<Arc<SecretString>>,
}

impl LikeTicket {
    pub fn comment_id(&self) -> &CommentId {
        &self.comment_id
    }

    pub async fn submit<R: RemoteDataSource>(self, remote: &R) -> LikeResolution {
        let result = remote
            .like_comment(&self.comment_id, self.token.as_deref())
            .await;
        LikeResolution {
            article_id: self.article_id,
            comment_id: self.comment_id,
            before: self.before,
            result,
        }
    }
}

#[derive(Debug)]
pub struct LikeResolution {
    article_id: ArticleId,
    comment_id: CommentId,
    before: u64,
    result: Result<(), RemoteError>,
}

#[derive(Debug, Default)]
struct ArticleComments {
    state: LoadState,
    loader: DeferredTask,
}

// ============================================================================
// Engine
// ============================================================================

/// Coordinates comment loads, adds, and likes against the remote store with
/// the local cache as the source of what the user sees.
///
/// Every mutation lands in the cache first and is reconciled when the
/// remote answers: confirmed records replace their optimistic version in
/// place, and rejected ones are rolled back with the error surfaced.
///
/// Loads are generation-tagged per article. Starting or scheduling a new
/// load for an article makes any earlier result for it stale.
pub struct CommentSyncEngine<R> {
    remote: Arc<R>,
    cache: PersistedCommentCache,
    session: SessionContext,
    articles: HashMap<ArticleId, ArticleComments>,
    /// Correlation ids of adds whose remote write has not resolved yet
    in_flight_adds: HashSet<Uuid>,
    /// Which article each known server comment belongs to
    comment_index: HashMap<CommentId, ArticleId>,
    timeout: Duration,
    load_delay: Duration,
}

impl<R: RemoteDataSource> CommentSyncEngine<R> {
    pub fn new(session: &SessionContext, remote: Arc<R>, cache: PersistedCommentCache) -> Self {
        let settings = session.settings();
        Self {
            remote,
            cache,
            session: session.clone(),
            articles: HashMap::new(),
            in_flight_adds: HashSet::new(),
            comment_index: HashMap::new(),
            timeout: settings.request_timeout,
            load_delay: settings.comment_load_delay,
        }
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn cache(&self) -> &PersistedCommentCache {
        &self.cache
    }

    pub fn state(&self, article_id: ArticleId) -> LoadState {
        self.articles
            .get(&article_id)
            .map(|a| a.state.clone())
            .unwrap_or_default()
    }

    /// Current local view of an article's comments. Never touches the network.
    pub async fn comments(&self, article_id: ArticleId) -> Result<Vec<CommentRecord>, SyncError> {
        Ok(self.cache.read(article_id).await?)
    }

    fn index(&mut self, article_id: ArticleId, records: &[CommentRecord]) {
        for record in records.iter().filter(|r| r.is_confirmed()) {
            self.comment_index.insert(record.id.clone(), article_id);
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Fetch comments, write them through the cache, and return the view.
    ///
    /// A failed fetch still returns `Ok`, with the cached snapshot marked
    /// stale and the error attached. `Err` means the local cache itself
    /// failed.
    pub async fn load(&mut self, article_id: ArticleId) -> Result<CommentsView, SyncError> {
        let ticket = self.begin_load(article_id);
        let fetch = self.dispatch_load(ticket).await;
        match self.finish_load(fetch).await? {
            Some(view) => Ok(view),
            None => {
                let records = self.cache.read(article_id).await?;
                Ok(CommentsView {
                    article_id,
                    orphaned: orphans(&records, &self.in_flight_adds),
                    records,
                    stale: true,
                    error: None,
                })
            }
        }
    }

    /// Mark an article as loading and supersede any earlier load for it.
    pub fn begin_load(&mut self, article_id: ArticleId) -> LoadTicket {
        let entry = self.articles.entry(article_id).or_default();
        entry.state = LoadState::Loading;
        let generation = entry.loader.supersede();
        tracing::debug!(article_id, %generation, "Comment load started");
        LoadTicket {
            article_id,
            generation,
        }
    }

    /// Run a load ticket. The returned future does not borrow the engine.
    pub fn dispatch_load(
        &self,
        ticket: LoadTicket,
    ) -> impl Future<Output = Tagged<CommentFetch>> + Send + 'static {
        let fetch = self.fetch_comments(ticket.article_id);
        async move { Tagged::new(ticket.generation, fetch.await) }
    }

    /// Load after `delay` (the configured comment load delay when `None`),
    /// delivering the tagged result on `tx`.
    ///
    /// Scheduling again for the same article aborts the earlier task. Feed
    /// whatever arrives on the channel to [`finish_load`](Self::finish_load).
    pub fn schedule_load(
        &mut self,
        article_id: ArticleId,
        delay: Option<Duration>,
        tx: mpsc::Sender<Tagged<CommentFetch>>,
    ) -> Generation {
        let delay = delay.unwrap_or(self.load_delay);
        let fetch = self.fetch_comments(article_id);
        let entry = self.articles.entry(article_id).or_default();
        entry.state = LoadState::Loading;
        let generation = entry.loader.schedule(delay, fetch, tx);
        tracing::debug!(article_id, %generation, delay_ms = delay.as_millis() as u64, "Comment load scheduled");
        generation
    }

    /// Abort a scheduled load. State returns to idle unless data was shown.
    pub fn cancel_load(&mut self, article_id: ArticleId) {
        if let Some(entry) = self.articles.get_mut(&article_id) {
            entry.loader.cancel();
            if entry.state == LoadState::Loading {
                entry.state = LoadState::Idle;
            }
        }
    }

    /// Apply a load result. Returns `None` when the result was superseded.
    pub async fn finish_load(
        &mut self,
        fetch: Tagged<CommentFetch>,
    ) -> Result<Option<CommentsView>, SyncError> {
        let article_id = fetch.value.article_id;
        let accepted = self
            .articles
            .get(&article_id)
            .and_then(|entry| entry.loader.accept(fetch));
        let Some(CommentFetch { result, .. }) = accepted else {
            return Ok(None);
        };

        match result {
            Ok(remote_records) => {
                let cached = self.cache.read(article_id).await?;
                let records = merge_refresh(&cached, remote_records, &self.in_flight_adds);
                self.cache.write(article_id, &records).await?;
                self.index(article_id, &records);
                self.set_state(article_id, LoadState::Loaded { stale: false });

                let orphaned = orphans(&records, &self.in_flight_adds);
                if !orphaned.is_empty() {
                    tracing::warn!(article_id, count = orphaned.len(), "Unsent comments found in cache");
                }
                tracing::debug!(article_id, count = records.len(), "Comments loaded");
                Ok(Some(CommentsView {
                    article_id,
                    records,
                    stale: false,
                    error: None,
                    orphaned,
                }))
            }
            Err(e) => {
                tracing::warn!(article_id, error = %e, "Comment load failed, falling back to cache");
                self.set_state(article_id, LoadState::Error(e.to_string()));

                let records = self.cache.read(article_id).await?;
                self.index(article_id, &records);
                self.set_state(article_id, LoadState::Loaded { stale: true });
                Ok(Some(CommentsView {
                    article_id,
                    orphaned: orphans(&records, &self.in_flight_adds),
                    records,
                    stale: true,
                    error: Some(SyncError::from(e)),
                }))
            }
        }
    }

    fn set_state(&mut self, article_id: ArticleId, state: LoadState) {
        self.articles.entry(article_id).or_default().state = state;
    }

    fn fetch_comments(
        &self,
        article_id: ArticleId,
    ) -> impl Future<Output = CommentFetch> + Send + 'static {
        let remote = Arc::clone(&self.remote);
        let timeout = self.timeout;
        async move {
            let call = remote.get_article_comments(article_id);
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(timeout.as_secs())),
            };
            CommentFetch { article_id, result }
        }
    }

    // ========================================================================
    // Add
    // ========================================================================

    /// Add a comment as the session's current user (or anonymously).
    pub async fn add(&mut self, article_id: ArticleId, body: &str) -> Result<AddSubmission, SyncError> {
        let author = self.session.author();
        self.add_as(article_id, body, author).await
    }

    /// Show a comment immediately.
    ///
    /// With an author the record is pending until the returned
    /// [`PendingComment`] is submitted and resolved. Without one the record
    /// stays local to this device and disappears on the next successful
    /// load.
    pub async fn add_as(
        &mut self,
        article_id: ArticleId,
        body: &str,
        author: Option<AuthorContext>,
    ) -> Result<AddSubmission, SyncError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SyncError::InvalidInput("Comment cannot be empty".to_string()));
        }

        let correlation_id = Uuid::new_v4();
        match author {
            None => {
                let record =
                    CommentRecord::provisional(correlation_id, None, ANONYMOUS_AUTHOR, body, true);
                self.cache.upsert_optimistic(article_id, record.clone()).await?;
                tracing::info!(article_id, %correlation_id, "Anonymous comment kept local only");
                Ok(AddSubmission::LocalOnly(record))
            }
            Some(author) => {
                let mut record = CommentRecord::provisional(
                    correlation_id,
                    Some(author.identity.user_id),
                    &author.identity.username,
                    body,
                    false,
                );
                record.author_avatar = author.identity.avatar.clone();
                self.cache.upsert_optimistic(article_id, record.clone()).await?;
                self.in_flight_adds.insert(correlation_id);
                tracing::debug!(article_id, %correlation_id, "Optimistic comment added");

                Ok(AddSubmission::Pending(PendingComment {
                    article_id,
                    record,
                    token: author.token,
                }))
            }
        }
    }

    /// Send a pending comment. The returned future does not borrow the engine.
    pub fn dispatch_add(
        &self,
        pending: PendingComment,
    ) -> impl Future<Output = AddResolution> + Send + 'static {
        let remote = Arc::clone(&self.remote);
        let timeout = self.timeout;
        async move {
            let article_id = pending.article_id;
            let record = pending.record.clone();
            match tokio::time::timeout(timeout, pending.submit(remote.as_ref())).await {
                Ok(resolution) => resolution,
                Err(_) => AddResolution {
                    article_id,
                    pending: record,
                    result: Err(RemoteError::Timeout(timeout.as_secs())),
                },
            }
        }
    }

    /// Reconcile an add with the remote outcome.
    ///
    /// On success returns the confirmed record. On failure the optimistic
    /// record is rolled back and the error carries the original body.
    pub async fn resolve_add(&mut self, resolution: AddResolution) -> Result<CommentRecord, SyncError> {
        let AddResolution {
            article_id,
            pending,
            result,
        } = resolution;
        let Some(correlation_id) = pending.correlation_id else {
            return Err(SyncError::InvalidInput(
                "Pending comment has no correlation id".to_string(),
            ));
        };
        self.in_flight_adds.remove(&correlation_id);

        match result {
            Ok(confirmed) => {
                let resolution = self
                    .cache
                    .resolve_optimistic(article_id, correlation_id, Ok(confirmed))
                    .await?;
                let records = match resolution {
                    Resolution::Confirmed { records } => records,
                    Resolution::RolledBack { records, .. } => records,
                };
                self.index(article_id, &records);
                tracing::debug!(article_id, %correlation_id, "Comment confirmed");

                records
                    .into_iter()
                    .find(|r| r.correlation_id == Some(correlation_id))
                    .ok_or(SyncError::NotFound)
            }
            Err(cause) => {
                let original = match self
                    .cache
                    .resolve_optimistic(article_id, correlation_id, Err(cause.to_string()))
                    .await?
                {
                    Resolution::RolledBack { original, .. } => original,
                    Resolution::Confirmed { .. } => None,
                };
                tracing::warn!(article_id, %correlation_id, error = %cause, "Comment rejected, rolled back");

                Err(SyncError::ReconciliationFailure {
                    correlation_id: Some(correlation_id),
                    original_body: Some(original.map(|r| r.body).unwrap_or(pending.body)),
                    cause,
                })
            }
        }
    }

    /// `add`, then submit and resolve in one step.
    pub async fn add_and_sync(
        &mut self,
        article_id: ArticleId,
        body: &str,
    ) -> Result<CommentRecord, SyncError> {
        match self.add(article_id, body).await? {
            AddSubmission::LocalOnly(record) => Ok(record),
            AddSubmission::Pending(pending) => {
                let resolution = self.dispatch_add(pending).await;
                self.resolve_add(resolution).await
            }
        }
    }

    /// Send an orphaned pending comment again as the current user.
    ///
    /// The cached record keeps its correlation id, so the returned
    /// [`PendingComment`] resolves through [`resolve_add`](Self::resolve_add)
    /// like a fresh add.
    pub async fn resubmit(
        &mut self,
        article_id: ArticleId,
        correlation_id: Uuid,
    ) -> Result<PendingComment, SyncError> {
        if self.in_flight_adds.contains(&correlation_id) {
            return Err(SyncError::InvalidInput(
                "Comment is already being sent".to_string(),
            ));
        }
        let author = self.session.author().ok_or(SyncError::Unauthenticated)?;
        let record = self
            .cache
            .read(article_id)
            .await?
            .into_iter()
            .find(|r| r.correlation_id == Some(correlation_id) && r.pending && !r.local_only)
            .ok_or(SyncError::NotFound)?;

        self.in_flight_adds.insert(correlation_id);
        tracing::info!(article_id, %correlation_id, "Resubmitting unsent comment");
        Ok(PendingComment {
            article_id,
            record,
            token: author.token,
        })
    }

    /// Drop a pending comment that will not be sent. Returns its record so
    /// the text can be offered again.
    pub async fn discard_pending(
        &mut self,
        article_id: ArticleId,
        correlation_id: Uuid,
    ) -> Result<CommentRecord, SyncError> {
        if self.in_flight_adds.contains(&correlation_id) {
            return Err(SyncError::InvalidInput(
                "Comment is already being sent".to_string(),
            ));
        }
        let records = self.cache.read(article_id).await?;
        if !records
            .iter()
            .any(|r| r.correlation_id == Some(correlation_id) && r.pending)
        {
            return Err(SyncError::NotFound);
        }
        let resolution = self
            .cache
            .resolve_optimistic(article_id, correlation_id, Err("Discarded".to_string()))
            .await?;
        match resolution {
            Resolution::RolledBack {
                original: Some(original),
                ..
            } => Ok(original),
            _ => Err(SyncError::NotFound),
        }
    }

    // ========================================================================
    // Like
    // ========================================================================

    /// Bump the like count locally and return the ticket for the remote call.
    ///
    /// Only comments the server knows about can be liked.
    pub async fn begin_like(&mut self, comment_id: &CommentId) -> Result<LikeTicket, SyncError> {
        if comment_id.is_provisional() {
            return Err(SyncError::NotFound);
        }
        let article_id = *self
            .comment_index
            .get(comment_id)
            .ok_or(SyncError::NotFound)?;

        let records = self.cache.read(article_id).await?;
        if !records
            .iter()
            .any(|r| &r.id == comment_id && r.is_confirmed())
        {
            return Err(SyncError::NotFound);
        }

        let mut before = 0;
        self.cache
            .update_record(article_id, comment_id, |r| {
                before = r.like_count;
                r.like_count += 1;
            })
            .await?
            .ok_or(SyncError::NotFound)?;

        Ok(LikeTicket {
            article_id,
            comment_id: comment_id.clone(),
            before,
            token: self.session.author().map(|a| a.token),
        })
    }

    pub fn dispatch_like(
        &self,
        ticket: LikeTicket,
    ) -> impl Future<Output = LikeResolution> + Send + 'static {
        let remote = Arc::clone(&self.remote);
        let timeout = self.timeout;
        async move {
            let article_id = ticket.article_id;
            let comment_id = ticket.comment_id.clone();
            let before = ticket.before;
            match tokio::time::timeout(timeout, ticket.submit(remote.as_ref())).await {
                Ok(resolution) => resolution,
                Err(_) => LikeResolution {
                    article_id,
                    comment_id,
                    before,
                    result: Err(RemoteError::Timeout(timeout.as_secs())),
                },
            }
        }
    }

    /// Keep the like on success, undo it on failure.
    ///
    /// The undo restores the pre-like count, and only while the cached count
    /// is still the optimistic one. A load that landed in between already
    /// holds the server's number.
    pub async fn resolve_like(&mut self, resolution: LikeResolution) -> Result<CommentRecord, SyncError> {
        let LikeResolution {
            article_id,
            comment_id,
            before,
            result,
        } = resolution;

        match result {
            Ok(()) => {
                let records = self.cache.read(article_id).await?;
                records
                    .into_iter()
                    .find(|r| r.id == comment_id)
                    .ok_or(SyncError::NotFound)
            }
            Err(cause) => {
                self.cache
                    .update_record(article_id, &comment_id, |r| {
                        if r.like_count == before + 1 {
                            r.like_count = before;
                        }
                    })
                    .await?;
                tracing::warn!(article_id, %comment_id, error = %cause, "Like rejected, reverted");

                Err(SyncError::ReconciliationFailure {
                    correlation_id: None,
                    original_body: None,
                    cause,
                })
            }
        }
    }

    /// Like a comment and wait for the server.
    pub async fn like(&mut self, comment_id: &CommentId) -> Result<CommentRecord, SyncError> {
        let ticket = self.begin_like(comment_id).await?;
        let resolution = self.dispatch_like(ticket).await;
        self.resolve_like(resolution).await
    }
}

/// Combine a fresh remote list with what is cached.
///
/// Authored pending records stay on top so the user's own comment does not
/// vanish mid-submit. One that is not in flight is dropped only when the
/// remote list already holds the same body by the same author, which means
/// its write landed before the answer was lost. Everything else cached is
/// replaced by the remote list; that includes anonymous local-only records.
fn merge_refresh(
    cached: &[CommentRecord],
    remote: Vec<CommentRecord>,
    in_flight: &HashSet<Uuid>,
) -> Vec<CommentRecord> {
    let landed = |pending: &CommentRecord| {
        remote
            .iter()
            .any(|r| r.author_id == pending.author_id && r.body == pending.body)
    };
    let mut merged: Vec<CommentRecord> = cached
        .iter()
        .filter(|r| r.pending && !r.local_only)
        .filter(|r| match r.correlation_id {
            Some(c) if in_flight.contains(&c) => true,
            Some(_) => !landed(r),
            None => false,
        })
        .cloned()
        .collect();

    let mut seen: HashSet<CommentId> = merged.iter().map(|r| r.id.clone()).collect();
    for record in remote {
        if seen.insert(record.id.clone()) {
            merged.push(record);
        }
    }
    merged
}

/// Authored pending records with no add in flight for them.
fn orphans(records: &[CommentRecord], in_flight: &HashSet<Uuid>) -> Vec<CommentRecord> {
    records
        .iter()
        .filter(|r| {
            r.pending
                && !r.local_only
                && r.correlation_id.is_some_and(|c| !in_flight.contains(&c))
        })
        .cloned()
        .collect()
}
