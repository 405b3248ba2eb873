mod comment_cache;
mod schema;
mod types;

pub use comment_cache::{PersistedCommentCache, Resolution, DEFAULT_VIEW_CAPACITY};
pub use schema::Database;
pub use types::{CacheStats, CommentId, CommentRecord, DatabaseError};
