use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the cache database
    #[error("The comment cache is locked by another iblog process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Comment Types
// ============================================================================

/// Comment identity.
///
/// Server ids are stored as their decimal string. Ids minted on the client
/// before the server has seen the comment carry [`CommentId::PROVISIONAL_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    pub const PROVISIONAL_PREFIX: &'static str = "local-";

    pub fn server(id: i64) -> Self {
        Self(id.to_string())
    }

    pub fn provisional(correlation_id: Uuid) -> Self {
        Self(format!("{}{}", Self::PROVISIONAL_PREFIX, correlation_id))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(Self::PROVISIONAL_PREFIX)
    }

    /// The numeric server id, or `None` for provisional ids.
    pub fn server_id(&self) -> Option<i64> {
        if self.is_provisional() {
            return None;
        }
        self.0.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached comment.
///
/// `pending` records are optimistic: shown immediately, awaiting the server.
/// `local_only` records were written anonymously and are never sent; they
/// vanish on the next successful remote refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentId,
    /// Client-minted id linking an optimistic record to its server result
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    pub author_id: Option<i64>,
    pub author_name: String,
    #[serde(default)]
    pub author_avatar: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub local_only: bool,
}

impl CommentRecord {
    /// Build an optimistic record for a comment the user just wrote.
    pub fn provisional(
        correlation_id: Uuid,
        author_id: Option<i64>,
        author_name: &str,
        body: &str,
        local_only: bool,
    ) -> Self {
        Self {
            id: CommentId::provisional(correlation_id),
            correlation_id: Some(correlation_id),
            author_id,
            author_name: author_name.to_string(),
            author_avatar: None,
            body: body.to_string(),
            created_at: Utc::now(),
            like_count: 0,
            pending: true,
            local_only,
        }
    }

    /// True for comments the server knows about and can act on.
    pub fn is_confirmed(&self) -> bool {
        !self.pending && !self.local_only && !self.id.is_provisional()
    }
}

/// Aggregate statistics over the comment cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached articles
    pub articles: i64,
    /// Total comment records across all articles
    pub records: i64,
    /// Oldest `updated_at` timestamp, if any
    pub oldest_entry: Option<String>,
    /// Newest `updated_at` timestamp, if any
    pub newest_entry: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_id_round_trip() {
        let correlation = Uuid::new_v4();
        let id = CommentId::provisional(correlation);
        assert!(id.is_provisional());
        assert!(id.as_str().ends_with(&correlation.to_string()));
        assert_eq!(id.server_id(), None);
    }

    #[test]
    fn test_server_id() {
        let id = CommentId::server(42);
        assert!(!id.is_provisional());
        assert_eq!(id.server_id(), Some(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_provisional_record_is_pending() {
        let record = CommentRecord::provisional(Uuid::new_v4(), None, "Anonymous", "hi", true);
        assert!(record.pending);
        assert!(record.local_only);
        assert!(!record.is_confirmed());
    }

    #[test]
    fn test_record_deserializes_without_optional_flags() {
        let json = r#"{
            "id": "5",
            "author_id": 1,
            "author_name": "alice",
            "body": "hello",
            "created_at": "2024-03-01T10:00:00Z",
            "like_count": 2
        }"#;
        let record: CommentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, CommentId::server(5));
        assert!(!record.pending);
        assert!(record.correlation_id.is_none());
        assert!(record.is_confirmed());
    }
}
