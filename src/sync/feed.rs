use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::fetcher::{PageOutcome, PageResponse, SequencedFetcher};
use super::generation::{Generation, GenerationCounter};
use crate::error::SyncError;
use crate::remote::{ArticleId, ArticleSummary, FilterKey, PageRequest, RemoteDataSource};
use crate::session::SessionContext;

/// A page load the controller has committed to.
///
/// Obtained from [`FeedController::reset`] or [`FeedController::load_next_page`],
/// run with [`FeedController::dispatch`], and fed back via
/// [`FeedController::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    generation: Generation,
    request: PageRequest,
}

impl PageTicket {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn request(&self) -> &PageRequest {
        &self.request
    }
}

/// What `apply` (or a `*_now` helper) did with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    /// Items from the page were applied.
    Applied {
        added: usize,
        duplicates: usize,
        has_more: bool,
    },
    /// The response belonged to a superseded epoch; state is untouched.
    Discarded,
    /// Nothing was requested (already loading or exhausted).
    Skipped,
}

/// Paginated list state for one feed.
#[derive(Debug)]
pub struct FeedState {
    items: Vec<ArticleSummary>,
    seen: HashSet<ArticleId>,
    cursor: usize,
    has_more: bool,
    filter: FilterKey,
    generation: GenerationCounter,
    in_flight: bool,
    last_error: Option<String>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            cursor: 0,
            has_more: true,
            filter: FilterKey::home(),
            generation: GenerationCounter::new(),
            in_flight: false,
            last_error: None,
        }
    }
}

impl FeedState {
    pub fn items(&self) -> &[ArticleSummary] {
        &self.items
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn filter(&self) -> &FilterKey {
        &self.filter
    }

    pub fn generation(&self) -> Generation {
        self.generation.current()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    /// Message of the last failed load, if not yet cleared.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A reset happened and nothing has arrived since.
    fn is_fresh_epoch(&self) -> bool {
        self.generation.current() != Generation::default()
            && self.items.is_empty()
            && self.cursor == 0
            && self.last_error.is_none()
    }
}

/// Owns one feed (home, category, or search) and decides when to reset,
/// append, or ignore.
///
/// Every reset opens a new generation. A response is applied only if it
/// was issued under the current generation, so a slow page for an old
/// filter can never overwrite a newer one. Within a generation at most one
/// request is in flight, so responses apply in issue order.
///
/// Network calls are owned futures obtained from [`dispatch`](Self::dispatch),
/// which lets the caller reset the controller while a request is pending.
pub struct FeedController<R> {
    state: FeedState,
    fetcher: Arc<SequencedFetcher<R>>,
    page_size: usize,
    prefetch_margin: usize,
}

impl<R: RemoteDataSource> FeedController<R> {
    pub fn new(session: &SessionContext, fetcher: Arc<SequencedFetcher<R>>) -> Self {
        let settings = session.settings();
        Self {
            state: FeedState::default(),
            fetcher,
            page_size: settings.page_size.max(1),
            prefetch_margin: settings.scroll_prefetch_margin,
        }
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn items(&self) -> &[ArticleSummary] {
        self.state.items()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    /// Switch to `filter` and start over.
    ///
    /// Clears items, rewinds the cursor, bumps the generation, and returns
    /// the ticket for the first page. Returns `None` when already reset to
    /// the same filter and waiting on (or never having received) its first
    /// page.
    pub fn reset(&mut self, filter: FilterKey) -> Option<PageTicket> {
        if self.state.filter == filter && self.state.is_fresh_epoch() {
            tracing::debug!(
                generation = %self.state.generation(),
                "Reset with unchanged filter, skipping redundant fetch"
            );
            return None;
        }
        Some(self.start_epoch(filter))
    }

    /// Force a new epoch with the current filter (pull-to-refresh).
    pub fn reload(&mut self) -> PageTicket {
        let filter = self.state.filter.clone();
        self.start_epoch(filter)
    }

    /// Alias for [`reset`](Self::reset) named after the UI event.
    pub fn on_filter_changed(&mut self, filter: FilterKey) -> Option<PageTicket> {
        self.reset(filter)
    }

    fn start_epoch(&mut self, filter: FilterKey) -> PageTicket {
        let generation = self.state.generation.bump();
        self.state.items.clear();
        self.state.seen.clear();
        self.state.cursor = 0;
        self.state.has_more = true;
        self.state.last_error = None;
        self.state.filter = filter;
        self.state.in_flight = true;

        tracing::debug!(
            %generation,
            kind = ?self.state.filter.kind(),
            "Feed reset"
        );
        self.ticket(generation)
    }

    /// Request the page at the cursor, unless one is already in flight or
    /// the feed is exhausted.
    pub fn load_next_page(&mut self) -> Option<PageTicket> {
        if self.state.in_flight {
            tracing::trace!("Page load already in flight, skipping");
            return None;
        }
        if !self.state.has_more {
            tracing::trace!("Feed exhausted, skipping page load");
            return None;
        }

        self.state.in_flight = true;
        let generation = self.state.generation.current();
        Some(self.ticket(generation))
    }

    /// Load more when the consumer's visible end is within the prefetch
    /// margin of the loaded items.
    pub fn on_scroll_threshold(&mut self, visible_end: usize) -> Option<PageTicket> {
        if visible_end.saturating_add(self.prefetch_margin) < self.state.items.len() {
            return None;
        }
        self.load_next_page()
    }

    /// Clear the error flag so a manual `load_next_page` can retry.
    pub fn clear_error(&mut self) {
        if self.state.last_error.take().is_some() {
            self.state.has_more = true;
        }
    }

    fn ticket(&self, generation: Generation) -> PageTicket {
        PageTicket {
            generation,
            request: PageRequest {
                filter: self.state.filter.clone(),
                limit: self.page_size,
                offset: self.state.cursor,
            },
        }
    }

    // ========================================================================
    // Network
    // ========================================================================

    /// Run a ticket. The returned future does not borrow the controller.
    pub fn dispatch(&self, ticket: PageTicket) -> impl Future<Output = PageResponse> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        async move { fetcher.fetch(ticket.request, ticket.generation).await }
    }

    /// Apply a response.
    ///
    /// Stale responses are dropped without touching state. On failure the
    /// already-loaded items are kept, the feed is marked exhausted, and the
    /// error is both recorded and returned.
    pub fn apply(&mut self, response: PageResponse) -> Result<FeedUpdate, SyncError> {
        let outcome = match self.accept(response) {
            Ok(outcome) => outcome,
            Err(SyncError::StaleResponse) => return Ok(FeedUpdate::Discarded),
            Err(e) => return Err(e),
        };

        self.state.in_flight = false;
        let PageOutcome { request, result } = outcome;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    generation = %self.state.generation(),
                    offset = request.offset,
                    error = %e,
                    "Page load failed"
                );
                self.state.has_more = false;
                self.state.last_error = Some(e.to_string());
                return Err(SyncError::from(e));
            }
        };

        let fetched = page.fetched;
        if request.offset == 0 {
            self.state.items.clear();
            self.state.seen.clear();
        }

        let mut added = 0;
        let mut duplicates = 0;
        for item in page.items {
            if self.state.seen.insert(item.id) {
                self.state.items.push(item);
                added += 1;
            } else {
                duplicates += 1;
            }
        }

        // The cursor follows server rows, including ones filtered out locally
        self.state.cursor += fetched;
        // An empty page ends the feed even if the server claims otherwise
        self.state.has_more = fetched > 0 && page.has_more.unwrap_or(fetched == request.limit);
        self.state.last_error = None;

        if duplicates > 0 {
            tracing::debug!(duplicates, offset = request.offset, "Skipped duplicate articles");
        }
        tracing::debug!(
            generation = %self.state.generation(),
            added,
            cursor = self.state.cursor,
            has_more = self.state.has_more,
            "Page applied"
        );

        Ok(FeedUpdate::Applied {
            added,
            duplicates,
            has_more: self.state.has_more,
        })
    }

    /// Filter out responses from other epochs or for an offset other than
    /// the one currently expected.
    fn accept(&self, response: PageResponse) -> Result<PageOutcome, SyncError> {
        let outcome = response
            .accept(&self.state.generation)
            .ok_or(SyncError::StaleResponse)?;

        if !self.state.in_flight
            || outcome.request.offset != self.state.cursor
            || outcome.request.filter != self.state.filter
        {
            tracing::debug!(
                offset = outcome.request.offset,
                cursor = self.state.cursor,
                "Ignoring response for unexpected offset"
            );
            return Err(SyncError::StaleResponse);
        }
        Ok(outcome)
    }

    // ========================================================================
    // Sequential Helpers
    // ========================================================================

    /// Reset and wait for the first page.
    pub async fn reset_now(&mut self, filter: FilterKey) -> Result<FeedUpdate, SyncError> {
        match self.reset(filter) {
            Some(ticket) => {
                let response = self.dispatch(ticket).await;
                self.apply(response)
            }
            None => Ok(FeedUpdate::Skipped),
        }
    }

    /// Load the next page and wait for it.
    pub async fn load_next_page_now(&mut self) -> Result<FeedUpdate, SyncError> {
        match self.load_next_page() {
            Some(ticket) => {
                let response = self.dispatch(ticket).await;
                self.apply(response)
            }
            None => Ok(FeedUpdate::Skipped),
        }
    }
}
