//! Durable job queue.
//!
//! Jobs are claimed in ascending id order among those currently due.
//! Claiming advances `not_before` by a short lease window in the same
//! statement that selects the job, so a claim is granted to at most one
//! caller at a time and a crash mid-processing leaves the job reclaimable
//! once the lease expires.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::info;

/// Seconds a claimed job is protected from re-claim. Must stay shorter than
/// any reasonable restart time so crashed work resurfaces quickly.
pub const LEASE_SECS: i64 = 5;

/// Retry backoff ceiling in seconds.
pub const MAX_BACKOFF_SECS: i64 = 60;

/// `min(60, 2^attempts)` seconds.
pub fn backoff_secs(attempts: i64) -> i64 {
    if attempts >= 6 {
        return MAX_BACKOFF_SECS;
    }
    (1i64 << attempts.max(0)).min(MAX_BACKOFF_SECS)
}

/// A job row as claimed from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueuedJob {
    pub id: i64,
    pub kind: String,
    /// Kind-specific JSON payload.
    pub payload: String,
    /// Correlation id linking the job to its source document.
    pub content_hash: Option<String>,
    /// Failed dispatch attempts so far.
    pub attempts: i64,
    pub not_before: i64,
    pub created_at: i64,
}

/// A job to insert, before it has an id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub payload: String,
    pub content_hash: Option<String>,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new job, eligible immediately.
    pub async fn enqueue(&self, job: &NewJob) -> Result<i64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (kind, payload, content_hash, attempts, not_before, created_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(&job.content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue job")?;

        let job_id = result.last_insert_rowid();
        info!("enqueued job id={} kind={}", job_id, job.kind);
        Ok(job_id)
    }

    /// Insert all jobs for one admitted document in a single transaction.
    pub async fn enqueue_all(&self, jobs: &[NewJob]) -> Result<Vec<i64>> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = sqlx::query(
                r#"
                INSERT INTO jobs (kind, payload, content_hash, attempts, not_before, created_at)
                VALUES (?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(&job.kind)
            .bind(&job.payload)
            .bind(&job.content_hash)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to enqueue job batch")?;
            ids.push(result.last_insert_rowid());
        }
        tx.commit().await?;
        for (job, id) in jobs.iter().zip(&ids) {
            info!("enqueued job id={} kind={}", id, job.kind);
        }
        Ok(ids)
    }

    /// Atomically claim the lowest-id job whose `not_before` has passed.
    ///
    /// One guarded UPDATE with RETURNING: select-and-lease cannot interleave
    /// with another claimer and never upgrades a read lock mid-transaction.
    /// The claim bumps `not_before` forward by [`LEASE_SECS`]; completion or
    /// failure must follow before the lease expires or another pass will
    /// re-claim the job.
    pub async fn claim_next_due(&self) -> Result<Option<QueuedJob>> {
        let now = Utc::now().timestamp();
        let job = sqlx::query_as(
            r#"
            UPDATE jobs
            SET not_before = ?
            WHERE id = (SELECT id FROM jobs WHERE not_before <= ? ORDER BY id ASC LIMIT 1)
              AND not_before <= ?
            RETURNING id, kind, payload, content_hash, attempts, not_before, created_at
            "#,
        )
        .bind(now + LEASE_SECS)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim next due job")?;
        Ok(job)
    }

    /// Delete a completed job. Idempotent: deleting an absent id is fine.
    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete completed job")?;
        Ok(())
    }

    /// Record a failed dispatch: store the new attempt count and push
    /// `not_before` out by the corresponding backoff. One UPDATE, so a
    /// concurrent reader never sees the counter without the backoff.
    pub async fn fail(&self, job_id: i64, attempts: i64) -> Result<()> {
        let not_before = Utc::now().timestamp() + backoff_secs(attempts);
        sqlx::query("UPDATE jobs SET attempts = ?, not_before = ? WHERE id = ?")
            .bind(attempts)
            .bind(not_before)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("Failed to record job failure")?;
        Ok(())
    }

    /// Total pending jobs. Observability only.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count jobs")?;
        Ok(count)
    }

    /// Fetch one job row by id, leased or not. Observability only.
    pub async fn get(&self, job_id: i64) -> Result<Option<QueuedJob>> {
        let job = sqlx::query_as(
            r#"
            SELECT id, kind, payload, content_hash, attempts, not_before, created_at
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;
        Ok(job)
    }
}
