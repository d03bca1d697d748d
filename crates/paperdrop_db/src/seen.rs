//! Seen-file index: content hashes already admitted into the system.
//!
//! Dedup is keyed on content, not filename, so the same document dropped
//! twice under different names is admitted once. Records are never updated
//! or deleted; the index is checked before enqueueing so duplicate drops
//! never create jobs in the first place.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct SeenIndex {
    pool: SqlitePool,
}

impl SeenIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a content hash as admitted. Returns whether this call inserted
    /// the record: concurrent admissions of identical content race on the
    /// `INSERT OR IGNORE`, and only the winner gets `true` and may enqueue.
    pub async fn mark_seen(&self, content_hash: &str, filename: &str) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_files (content_hash, filename, first_seen_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(content_hash)
        .bind(filename)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to mark file as seen")?
        .rows_affected();
        Ok(inserted == 1)
    }

    pub async fn is_seen(&self, content_hash: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM seen_files WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query seen_files")?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn index() -> SeenIndex {
        SeenIndex::new(crate::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn unseen_hash_reports_false() {
        let index = index().await;
        assert!(!index.is_seen("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn mark_then_query() {
        let index = index().await;
        assert!(index.mark_seen("deadbeef", "invoice.pdf").await.unwrap());
        assert!(index.is_seen("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn only_the_first_mark_wins() {
        let index = index().await;
        assert!(index.mark_seen("deadbeef", "first.pdf").await.unwrap());
        assert!(!index.mark_seen("deadbeef", "second.pdf").await.unwrap());

        let filename: String =
            sqlx::query_scalar("SELECT filename FROM seen_files WHERE content_hash = ?")
                .bind("deadbeef")
                .fetch_one(&index.pool)
                .await
                .unwrap();
        assert_eq!(filename, "first.pdf");
    }
}
