//! Administrative operations: progress inspection and forced reprocessing.

use sqlx::PgPool;
use tracing::info;
use vectorsync_core::{PipelineConfig, PipelineError};

/// Count work-queue rows still pending (not yet completed, failed, or
/// skipped).
pub async fn count_remaining(pool: &PgPool, config: &PipelineConfig) -> Result<i64, PipelineError> {
    let namespace = config.namespace();
    let sql = format!(r#"SELECT COUNT(*) FROM "{namespace}".work_queue WHERE status = 'pending'"#);
    let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Force every tracked document to be reprocessed: bump every shadow row's
/// clock by one, and backfill shadow rows for any source row that somehow
/// never received one. Existing chunks are left in place — the next worker
/// pass re-derives them via the normal outdated-clock comparison.
pub async fn reprocess_all(pool: &PgPool, config: &PipelineConfig) -> Result<(), PipelineError> {
    let namespace = config.namespace();
    let shadow_table = config.shadow_table();
    let source = config.source_table.qualified();

    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        r#"UPDATE "{namespace}".{shadow_table} SET vector_clock = vector_clock + 1"#
    ))
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        r#"
        INSERT INTO "{namespace}".{shadow_table} (doc_id, vector_clock)
        SELECT id, 1 FROM {source} s
        WHERE NOT EXISTS (
            SELECT 1 FROM "{namespace}".{shadow_table} sh WHERE sh.doc_id = s.id
        )
        "#
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(namespace = %namespace, "reprocess_all: every tracked document marked outdated");
    Ok(())
}
