use anyhow::{Context, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::schema::Database;
use super::types::{CacheStats, CommentId, CommentRecord};
use crate::remote::ArticleId;

/// Default number of article collections kept decoded in memory.
pub const DEFAULT_VIEW_CAPACITY: usize = 64;

/// Outcome of reconciling an optimistic record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The pending record was replaced by the server-confirmed one.
    Confirmed { records: Vec<CommentRecord> },
    /// The pending record was removed. `original` is what the user wrote, so
    /// the caller can offer it again; `None` if it was already gone.
    RolledBack {
        original: Option<CommentRecord>,
        reason: String,
        records: Vec<CommentRecord>,
    },
}

/// Per-article, local-first comment store.
///
/// Snapshots are persisted in SQLite (one row per article, JSON array of
/// records) and mirrored in a small LRU of decoded collections. Reads never
/// touch the network. Clones share both the pool and the in-memory view.
///
/// Writes are last-writer-wins per article.
#[derive(Clone)]
pub struct PersistedCommentCache {
    db: Database,
    view: Arc<Mutex<LruCache<ArticleId, Vec<CommentRecord>>>>,
}

impl PersistedCommentCache {
    pub fn new(db: Database, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_VIEW_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            view: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn view_get(&self, article_id: ArticleId) -> Option<Vec<CommentRecord>> {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        view.get(&article_id).cloned()
    }

    fn view_put(&self, article_id: ArticleId, records: Vec<CommentRecord>) {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        view.put(article_id, records);
    }

    fn view_remove(&self, article_id: ArticleId) {
        let mut view = self.view.lock().unwrap_or_else(|e| e.into_inner());
        view.pop(&article_id);
    }

    // ========================================================================
    // Snapshot Operations
    // ========================================================================

    /// Last stored snapshot for an article, newest first. Empty if the
    /// article was never cached.
    ///
    /// A corrupt row is logged and treated as empty rather than failing the
    /// caller; the next successful write repairs it.
    pub async fn read(&self, article_id: ArticleId) -> Result<Vec<CommentRecord>> {
        if let Some(records) = self.view_get(article_id) {
            return Ok(records);
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT records FROM comment_cache WHERE article_id = ?")
                .bind(article_id)
                .fetch_optional(&self.db.pool)
                .await?;

        let records = match row {
            Some((json,)) => match serde_json::from_str::<Vec<CommentRecord>>(&json) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(article_id, error = %e, "Corrupt comment snapshot, ignoring");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        self.view_put(article_id, records.clone());
        Ok(records)
    }

    /// Atomically replace the snapshot for an article.
    pub async fn write(&self, article_id: ArticleId, records: &[CommentRecord]) -> Result<()> {
        let json = serde_json::to_string(records).context("Failed to serialize comments")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO comment_cache (article_id, records, record_count, updated_at)
            VALUES (?, ?, ?, datetime('now'))
        "#,
        )
        .bind(article_id)
        .bind(&json)
        .bind(records.len() as i64)
        .execute(&self.db.pool)
        .await?;

        self.view_put(article_id, records.to_vec());
        tracing::trace!(article_id, count = records.len(), "Comment snapshot written");
        Ok(())
    }

    // ========================================================================
    // Optimistic Mutations
    // ========================================================================

    /// Prepend a pending record and persist immediately.
    ///
    /// If a record with the same correlation id is already present it is
    /// replaced in place, so a retried submission never duplicates.
    pub async fn upsert_optimistic(
        &self,
        article_id: ArticleId,
        record: CommentRecord,
    ) -> Result<Vec<CommentRecord>> {
        let mut records = self.read(article_id).await?;

        let existing = record
            .correlation_id
            .and_then(|c| records.iter().position(|r| r.correlation_id == Some(c)));
        match existing {
            Some(pos) => records[pos] = record,
            None => records.insert(0, record),
        }

        self.write(article_id, &records).await?;
        Ok(records)
    }

    /// Reconcile a pending record with the server's answer.
    ///
    /// On success the pending record is replaced at its position by the
    /// confirmed one (which keeps the correlation id). If a refresh already
    /// brought in the confirmed record, the duplicate is dropped. If the
    /// pending record is gone entirely, the confirmed record is prepended.
    ///
    /// On failure the pending record is removed and handed back.
    pub async fn resolve_optimistic(
        &self,
        article_id: ArticleId,
        correlation_id: Uuid,
        outcome: Result<CommentRecord, String>,
    ) -> Result<Resolution> {
        let mut records = self.read(article_id).await?;
        let pending_pos = records
            .iter()
            .position(|r| r.correlation_id == Some(correlation_id));

        match outcome {
            Ok(mut confirmed) => {
                confirmed.pending = false;
                confirmed.local_only = false;
                confirmed.correlation_id = Some(correlation_id);

                match pending_pos {
                    Some(pos) => {
                        records[pos] = confirmed.clone();
                        let mut seen = false;
                        records.retain(|r| {
                            if r.id != confirmed.id {
                                return true;
                            }
                            let keep = !seen;
                            seen = true;
                            keep
                        });
                    }
                    None => {
                        if !records.iter().any(|r| r.id == confirmed.id) {
                            records.insert(0, confirmed);
                        }
                    }
                }

                self.write(article_id, &records).await?;
                Ok(Resolution::Confirmed { records })
            }
            Err(reason) => {
                let original = pending_pos.map(|pos| records.remove(pos));
                if original.is_some() {
                    self.write(article_id, &records).await?;
                }
                tracing::debug!(
                    article_id,
                    %correlation_id,
                    reason = %reason,
                    "Optimistic comment rolled back"
                );
                Ok(Resolution::RolledBack {
                    original,
                    reason,
                    records,
                })
            }
        }
    }

    /// Mutate one record in place and persist.
    ///
    /// Returns the updated record, or `None` if the id is not cached for
    /// this article (nothing is written in that case).
    pub async fn update_record<F>(
        &self,
        article_id: ArticleId,
        comment_id: &CommentId,
        mutate: F,
    ) -> Result<Option<CommentRecord>>
    where
        F: FnOnce(&mut CommentRecord),
    {
        let mut records = self.read(article_id).await?;
        let Some(record) = records.iter_mut().find(|r| &r.id == comment_id) else {
            return Ok(None);
        };
        mutate(record);
        let updated = record.clone();

        self.write(article_id, &records).await?;
        Ok(Some(updated))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop an article's snapshot. Returns true if one existed.
    pub async fn evict(&self, article_id: ArticleId) -> Result<bool> {
        self.view_remove(article_id);
        let result = sqlx::query("DELETE FROM comment_cache WHERE article_id = ?")
            .bind(article_id)
            .execute(&self.db.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let row: (i64, Option<i64>, Option<String>, Option<String>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(record_count), MIN(updated_at), MAX(updated_at)
            FROM comment_cache
        "#,
        )
        .fetch_one(&self.db.pool)
        .await?;

        Ok(CacheStats {
            articles: row.0,
            records: row.1.unwrap_or(0),
            oldest_entry: row.2,
            newest_entry: row.3,
        })
    }
}
