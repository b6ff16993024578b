//! Work-queue enqueuer: turns shadow/chunk divergence into pending
//! work-queue rows, safe to run concurrently from many workers.

use sqlx::PgPool;
use tracing::debug;
use vectorsync_core::PipelineConfig;

/// Enqueue up to `batch_size` outdated `(doc_id, vector_clock)` pairs as
/// pending jobs, ordered most-stale-first with oldest as the tiebreak.
/// Returns the number of rows actually inserted (duplicates are silently
/// absorbed by `ON CONFLICT DO NOTHING`, which is the queue's coordination
/// primitive across concurrent workers).
pub async fn enqueue_pending(pool: &PgPool, config: &PipelineConfig, batch_size: u32) -> Result<u64, sqlx::Error> {
    let namespace = config.namespace();
    let shadow_table = config.shadow_table();
    let chunks_table = config.chunks_table();

    let sql = format!(
        r#"
        WITH outdated AS (
            SELECT
                s.doc_id::text AS doc_id,
                s.vector_clock AS shadow_clock,
                COALESCE(c.chunk_clock, 0) AS chunk_clock
            FROM "{namespace}".{shadow_table} s
            LEFT JOIN (
                SELECT doc_id, MAX(vector_clock) AS chunk_clock
                FROM "{namespace}".{chunks_table}
                GROUP BY doc_id
            ) c ON c.doc_id = s.doc_id
            WHERE s.vector_clock > COALESCE(c.chunk_clock, 0)
        ),
        candidates AS (
            SELECT o.doc_id, o.shadow_clock
            FROM outdated o
            WHERE NOT EXISTS (
                SELECT 1 FROM "{namespace}".work_queue wq
                WHERE wq.doc_id = o.doc_id AND wq.vector_clock = o.shadow_clock
            )
            ORDER BY (o.shadow_clock - o.chunk_clock) DESC, o.shadow_clock ASC
            LIMIT $1
        )
        INSERT INTO "{namespace}".work_queue (doc_id, vector_clock, status)
        SELECT doc_id, shadow_clock, 'pending' FROM candidates
        ON CONFLICT (doc_id, vector_clock) DO NOTHING
        RETURNING id
        "#
    );

    let inserted: Vec<(i64,)> = sqlx::query_as(&sql)
        .bind(batch_size as i64)
        .fetch_all(pool)
        .await?;

    let count = inserted.len() as u64;
    if count > 0 {
        debug!(namespace = %namespace, count, "enqueued pending jobs");
    }
    Ok(count)
}
