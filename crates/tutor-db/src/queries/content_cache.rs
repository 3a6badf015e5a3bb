//! Query functions for the `content_cache` table.
//!
//! Functions are generic over [`sqlx::PgExecutor`] so callers can run them on
//! the shared pool or on a connection acquired for a single generation task;
//! the orchestrator gives every concurrent task its own connection and these
//! signatures keep that possible. [`upsert`] issues two statements and
//! therefore takes `&mut PgConnection`.
//!
//! Fingerprint matching is exact throughout: a null fingerprint matches only
//! the null-fingerprint row (`IS NOT DISTINCT FROM`), never acting as a
//! wildcard over question-scoped rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{ContentCacheEntry, ContentKind, GenerationStatus, NodeKind};

/// Exact point lookup. A miss is a normal outcome, not an error.
pub async fn find<'e, E>(
    executor: E,
    curriculum_id: Uuid,
    node_id: Uuid,
    kind: ContentKind,
    question_fingerprint: Option<&str>,
) -> Result<Option<ContentCacheEntry>>
where
    E: PgExecutor<'e>,
{
    let entry = sqlx::query_as::<_, ContentCacheEntry>(
        "SELECT * FROM content_cache \
         WHERE curriculum_id = $1 AND node_id = $2 AND content_kind = $3 \
           AND question_fingerprint IS NOT DISTINCT FROM $4",
    )
    .bind(curriculum_id)
    .bind(node_id)
    .bind(kind)
    .bind(question_fingerprint)
    .fetch_optional(executor)
    .await
    .context("failed to fetch content cache entry")?;

    Ok(entry)
}

/// Seed one node-level row, doing nothing when it already exists.
///
/// Uses `ON CONFLICT DO NOTHING` so repeat initialization of the same
/// curriculum is a no-op. Returns whether a row was actually inserted.
pub async fn initialize<'e, E>(
    executor: E,
    curriculum_id: Uuid,
    node_id: Uuid,
    kind: ContentKind,
    node_kind: NodeKind,
    initial_status: GenerationStatus,
) -> Result<bool>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO content_cache \
             (curriculum_id, node_id, content_kind, node_kind, generation_status) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT DO NOTHING",
    )
    .bind(curriculum_id)
    .bind(node_id)
    .bind(kind)
    .bind(node_kind)
    .bind(initial_status)
    .execute(executor)
    .await
    .context("failed to initialize content cache entry")?;

    Ok(result.rows_affected() > 0)
}

/// Insert or update-in-place the row matching the exact key.
///
/// Last writer wins: generation is the sole writer of payloads, so no
/// optimistic check is needed. A successful write clears any prior error.
#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    conn: &mut PgConnection,
    curriculum_id: Uuid,
    node_id: Uuid,
    kind: ContentKind,
    question_fingerprint: Option<&str>,
    node_kind: NodeKind,
    payload: &str,
    status: GenerationStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<ContentCacheEntry> {
    let updated = sqlx::query_as::<_, ContentCacheEntry>(
        "UPDATE content_cache \
         SET payload = $5, generation_status = $6, completed_at = $7, error = NULL \
         WHERE curriculum_id = $1 AND node_id = $2 AND content_kind = $3 \
           AND question_fingerprint IS NOT DISTINCT FROM $4 \
         RETURNING *",
    )
    .bind(curriculum_id)
    .bind(node_id)
    .bind(kind)
    .bind(question_fingerprint)
    .bind(payload)
    .bind(status)
    .bind(completed_at)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to update content cache entry")?;

    if let Some(entry) = updated {
        return Ok(entry);
    }

    let inserted = sqlx::query_as::<_, ContentCacheEntry>(
        "INSERT INTO content_cache \
             (curriculum_id, node_id, content_kind, question_fingerprint, node_kind, \
              payload, generation_status, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(curriculum_id)
    .bind(node_id)
    .bind(kind)
    .bind(question_fingerprint)
    .bind(node_kind)
    .bind(payload)
    .bind(status)
    .bind(completed_at)
    .fetch_one(&mut *conn)
    .await
    .context("failed to insert content cache entry")?;

    Ok(inserted)
}

/// Partial status-only update on the row matching the exact key.
///
/// `started_at` and `completed_at` are merged (existing values survive a
/// `None`); `error` is written as given so a non-failed transition clears it.
/// Returns the number of rows affected.
#[allow(clippy::too_many_arguments)]
pub async fn update_status<'e, E>(
    executor: E,
    curriculum_id: Uuid,
    node_id: Uuid,
    kind: ContentKind,
    question_fingerprint: Option<&str>,
    status: GenerationStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<&str>,
) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE content_cache \
         SET generation_status = $5, \
             started_at = COALESCE($6, started_at), \
             completed_at = COALESCE($7, completed_at), \
             error = $8 \
         WHERE curriculum_id = $1 AND node_id = $2 AND content_kind = $3 \
           AND question_fingerprint IS NOT DISTINCT FROM $4",
    )
    .bind(curriculum_id)
    .bind(node_id)
    .bind(kind)
    .bind(question_fingerprint)
    .bind(status)
    .bind(started_at)
    .bind(completed_at)
    .bind(error)
    .execute(executor)
    .await
    .context("failed to update content cache status")?;

    Ok(result.rows_affected())
}

/// Distinct curriculum ids with any row still in `generating` or `pending`.
///
/// Input to startup recovery; `quiz_pending` rows do not count.
pub async fn find_stuck<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT curriculum_id FROM content_cache \
         WHERE generation_status IN ('generating', 'pending') \
         ORDER BY curriculum_id",
    )
    .fetch_all(executor)
    .await
    .context("failed to scan for stuck curricula")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Bulk-demote `generating` rows to `pending`, clearing `started_at`.
///
/// A row observed as `generating` after a restart cannot truthfully still be
/// in flight. Returns the number of rows reset.
pub async fn reset_stuck_to_pending<'e, E>(executor: E) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE content_cache \
         SET generation_status = 'pending', started_at = NULL \
         WHERE generation_status = 'generating'",
    )
    .execute(executor)
    .await
    .context("failed to reset stuck content cache rows")?;

    Ok(result.rows_affected())
}

/// All rows for a curriculum, ordered by creation time.
pub async fn list_for_curriculum<'e, E>(
    executor: E,
    curriculum_id: Uuid,
) -> Result<Vec<ContentCacheEntry>>
where
    E: PgExecutor<'e>,
{
    let entries = sqlx::query_as::<_, ContentCacheEntry>(
        "SELECT * FROM content_cache WHERE curriculum_id = $1 ORDER BY created_at ASC",
    )
    .bind(curriculum_id)
    .fetch_all(executor)
    .await
    .context("failed to list content cache entries")?;

    Ok(entries)
}

/// Row counts by status for a curriculum.
#[derive(Debug, Clone, Default)]
pub struct CacheProgress {
    pub pending: i64,
    pub generating: i64,
    pub completed: i64,
    pub failed: i64,
    pub quiz_pending: i64,
    pub total: i64,
}

/// Summarize a curriculum's generation progress.
pub async fn count_by_status<'e, E>(executor: E, curriculum_id: Uuid) -> Result<CacheProgress>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT generation_status::text, COUNT(*) \
         FROM content_cache \
         WHERE curriculum_id = $1 \
         GROUP BY generation_status",
    )
    .bind(curriculum_id)
    .fetch_all(executor)
    .await
    .context("failed to count content cache entries")?;

    let mut progress = CacheProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "generating" => progress.generating = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "quiz_pending" => progress.quiz_pending = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Delete every row of a curriculum.
///
/// The hook cascading curriculum deletion calls; returns the rows removed.
pub async fn delete_for_curriculum<'e, E>(executor: E, curriculum_id: Uuid) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM content_cache WHERE curriculum_id = $1")
        .bind(curriculum_id)
        .execute(executor)
        .await
        .context("failed to delete content cache entries")?;

    Ok(result.rows_affected())
}
