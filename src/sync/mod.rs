//! Ordering and reconciliation on top of the remote data source.
//!
//! - [`generation`] - Generation tokens and the deferred task primitive
//! - [`fetcher`] - [`SequencedFetcher`], generation-tagged page fetches
//! - [`feed`] - [`FeedController`], paginated de-duplicated feeds
//! - [`comments`] - [`CommentSyncEngine`], local-first comments
//!
//! All state objects take `&mut self` and are driven from one task. Network
//! work is handed out as owned futures, so the caller decides whether to
//! await inline or spawn; staleness is resolved when results are applied.

pub mod comments;
pub mod feed;
pub mod fetcher;
pub mod generation;

pub use comments::{
    AddResolution, AddSubmission, CommentFetch, CommentSyncEngine, CommentsView, LikeResolution,
    LikeTicket, LoadState, LoadTicket, PendingComment, ANONYMOUS_AUTHOR,
};
pub use feed::{FeedController, FeedState, FeedUpdate, PageTicket};
pub use fetcher::{PageOutcome, PageResponse, SequencedFetcher};
pub use generation::{DeferredTask, Generation, GenerationCounter, Tagged};
