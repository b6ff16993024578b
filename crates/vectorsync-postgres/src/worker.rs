//! Worker claim/process/complete protocol: atomic claiming via
//! `SELECT ... FOR UPDATE SKIP LOCKED`, per-job chunk diffing and embedding,
//! and a completion gate that ties the chunk swap to the queue row's
//! terminal state in a single transaction.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vectorsync_core::{
    backoff::backoff_delay, ChunkFn, EmbedFn, HashFn, JobOutcome, PermanentCallbackError,
    PipelineConfig, PipelineError,
};

use crate::enqueue::enqueue_pending;
use crate::rows::WorkQueueRow;

/// Classify a chunker/embedder failure: a bare callback error defaults to
/// retryable, but `PermanentCallbackError` is an explicit permanent signal
/// from the user callback and is never retried.
fn classify_callback_error(err: anyhow::Error) -> JobOutcome {
    match err.downcast::<PermanentCallbackError>() {
        Ok(permanent) => JobOutcome::Failed(permanent.0),
        Err(err) => JobOutcome::Retry(err.to_string()),
    }
}

/// A long-running worker: two independent periodic loops (enqueue, process)
/// sharing one connection pool and one random `worker_id`.
pub struct Worker {
    pool: PgPool,
    config: Arc<PipelineConfig>,
    chunker: Arc<dyn ChunkFn>,
    embedder: Arc<dyn EmbedFn>,
    hasher: Arc<dyn HashFn>,
    worker_id: Uuid,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        config: Arc<PipelineConfig>,
        chunker: Arc<dyn ChunkFn>,
        embedder: Arc<dyn EmbedFn>,
        hasher: Arc<dyn HashFn>,
    ) -> Self {
        Worker {
            pool,
            config,
            chunker,
            embedder,
            hasher,
            worker_id: Uuid::new_v4(),
        }
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Run `f`, which is expected to emit `tracing` events, through this
    /// pipeline's configured log sink rather than the process-global
    /// subscriber, if one was set via `PipelineConfig::with_logger`.
    fn log<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.config.logger {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    /// Run the enqueue loop until `shutdown` fires. A new tick is only
    /// scheduled after the previous one completes.
    pub async fn run_enqueue_loop(&self, mut shutdown: watch::Receiver<bool>) {
        self.log(|| info!(worker_id = %self.worker_id, "enqueue loop started"));
        loop {
            if *shutdown.borrow() {
                break;
            }

            match enqueue_pending(&self.pool, &self.config, self.config.tuning.batch_size).await {
                Ok(n) if n > 0 => self.log(|| debug!(worker_id = %self.worker_id, enqueued = n, "enqueue tick")),
                Ok(_) => {}
                Err(e) => self.log(|| error!(worker_id = %self.worker_id, error = %e, "enqueue tick failed")),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tuning.polling_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.log(|| info!(worker_id = %self.worker_id, "enqueue loop stopped"));
    }

    /// Run the process loop until `shutdown` fires.
    pub async fn run_process_loop(&self, mut shutdown: watch::Receiver<bool>) {
        self.log(|| info!(worker_id = %self.worker_id, "process loop started"));
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.claim().await {
                Ok(jobs) => {
                    for job in &jobs {
                        self.process_and_apply(job).await;
                    }
                }
                Err(e) => self.log(|| error!(worker_id = %self.worker_id, error = %e, "claim failed")),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tuning.polling_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.log(|| info!(worker_id = %self.worker_id, "process loop stopped"));
    }

    /// Claim and process one batch of jobs without entering the polling
    /// loop. Exposed for callers (and tests) that want to drive the worker
    /// deterministically rather than on a timer.
    pub async fn tick(&self) -> Result<usize, PipelineError> {
        let jobs = self.claim().await?;
        let n = jobs.len();
        for job in &jobs {
            self.process_and_apply(job).await;
        }
        Ok(n)
    }

    /// Atomically claim up to `batch_size` pending-or-stalled jobs.
    async fn claim(&self) -> Result<Vec<WorkQueueRow>, PipelineError> {
        let namespace = self.config.namespace();
        let stall_secs = self.config.tuning.stalled_job_timeout.as_secs() as i64;

        let sql = format!(
            r#"
            WITH claimable AS (
                SELECT id FROM "{namespace}".work_queue
                WHERE status = 'pending'
                   OR (status = 'processing' AND processing_started_at < now() - ($3 || ' seconds')::interval)
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT $1
            )
            UPDATE "{namespace}".work_queue wq
            SET status = 'processing', processing_started_at = now(), worker_id = $2
            FROM claimable
            WHERE wq.id = claimable.id
              AND (wq.status = 'pending' OR (wq.status = 'processing' AND wq.processing_started_at < now() - ($3 || ' seconds')::interval))
            RETURNING wq.id, wq.doc_id, wq.vector_clock, wq.status, wq.created_at,
                      wq.processing_started_at, wq.completed_at, wq.worker_id, wq.error, wq.retry_count
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(self.config.tuning.batch_size as i64)
            .bind(self.worker_id)
            .bind(stall_secs.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(WorkQueueRow::from_pg_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PipelineError::from)
    }

    /// Process one claimed job and persist the resulting lifecycle
    /// transition, including the retry-bound → failed escalation.
    async fn process_and_apply(&self, job: &WorkQueueRow) {
        let outcome = self.process_job(job).await;

        match outcome {
            JobOutcome::Completed => {
                self.log(|| info!(worker_id = %self.worker_id, doc_id = %job.doc_id, vector_clock = job.vector_clock, "job completed"));
            }
            JobOutcome::Untouched => {
                self.log(|| debug!(worker_id = %self.worker_id, doc_id = %job.doc_id, "completion gate superseded by newer claim, leaving job untouched"));
            }
            JobOutcome::Skipped(reason) => {
                self.log(|| warn!(worker_id = %self.worker_id, doc_id = %job.doc_id, reason = %reason, "job skipped"));
                self.mark_skipped(job.id, &reason).await;
            }
            JobOutcome::Failed(reason) => {
                self.log(|| error!(worker_id = %self.worker_id, doc_id = %job.doc_id, reason = %reason, "job failed (permanent)"));
                self.mark_failed(job.id, &reason).await;
            }
            JobOutcome::Retry(reason) => {
                if job.retry_count >= self.config.tuning.max_retries as i32 {
                    self.log(|| error!(worker_id = %self.worker_id, doc_id = %job.doc_id, retry_count = job.retry_count, reason = %reason, "job failed after exhausting retries"));
                    self.mark_failed(job.id, &reason).await;
                } else {
                    let delay = backoff_delay(self.config.tuning.initial_retry_delay, job.retry_count as u32);
                    self.log(|| warn!(worker_id = %self.worker_id, doc_id = %job.doc_id, retry_count = job.retry_count, delay_ms = delay.as_millis() as u64, reason = %reason, "job returned to pending for retry"));
                    self.mark_retry(job.id, &reason).await;
                }
            }
        }
    }

    async fn process_job(&self, job: &WorkQueueRow) -> JobOutcome {
        let namespace = self.config.namespace();
        let doc_id_sql = self.config.doc_id_kind.sql_type();
        let shadow_table = self.config.shadow_table();
        let chunks_table = self.config.chunks_table();

        // 1. Preemption check.
        let latest: Option<(i64,)> = match sqlx::query_as(&format!(
            r#"SELECT vector_clock FROM "{namespace}".work_queue WHERE doc_id = $1 ORDER BY vector_clock DESC LIMIT 1"#
        ))
        .bind(&job.doc_id)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };
        if let Some((latest_clock,)) = latest {
            if latest_clock > job.vector_clock {
                return JobOutcome::Skipped("newer job found".to_string());
            }
        }

        // 2. Load row.
        let row_json: Option<(serde_json::Value,)> = match sqlx::query_as(&format!(
            r#"SELECT row_to_json(t) FROM {} t WHERE t.id = $1::{doc_id_sql}"#,
            self.config.source_table.qualified()
        ))
        .bind(&job.doc_id)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };
        let Some((row_json,)) = row_json else {
            return JobOutcome::Skipped("document deleted".to_string());
        };

        // 3. Chunk.
        let chunks = match self.chunker.chunk(&row_json).await {
            Ok(c) => c,
            Err(e) => return classify_callback_error(e),
        };

        // 4. Hash.
        let keyed: Vec<(String, vectorsync_core::ChunkInput)> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let h = self.hasher.hash(&chunk);
                (vectorsync_core::hashing::composite_key(&h, i), chunk)
            })
            .collect();

        // 5. Job transaction.
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };

        let existing: Vec<(String,)> = match sqlx::query_as(&format!(
            r#"SELECT chunk_hash FROM "{namespace}".{chunks_table} WHERE doc_id = $1::{doc_id_sql}"#
        ))
        .bind(&job.doc_id)
        .fetch_all(&mut *tx)
        .await
        {
            Ok(rows) => rows,
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };
        let existing: std::collections::HashSet<String> = existing.into_iter().map(|(h,)| h).collect();

        let to_delete: Vec<String> = existing
            .iter()
            .filter(|h| !keyed.iter().any(|(k, _)| k == *h))
            .cloned()
            .collect();

        for (index, (key, chunk)) in keyed.iter().enumerate() {
            if existing.contains(key) {
                continue;
            }

            let embedded = match self.embedder.embed(chunk, index).await {
                Ok(e) => e,
                Err(e) => return classify_callback_error(e),
            };

            if embedded.embedding.len() != self.config.embedding_dimension {
                return JobOutcome::Failed(format!(
                    "invalid embedding dimension: expected {}, got {}",
                    self.config.embedding_dimension,
                    embedded.embedding.len()
                ));
            }
            if let Some(bad) = embedded.embedding.iter().position(|v| !v.is_finite()) {
                return JobOutcome::Failed(format!(
                    "embedding contains non-finite value at index {bad}"
                ));
            }

            let vector = pgvector::Vector::from(embedded.embedding);
            let insert_sql = format!(
                r#"
                INSERT INTO "{namespace}".{chunks_table}
                    (doc_id, vector_clock, index, chunk_hash, text, blob, json, embedding)
                VALUES ($1::{doc_id_sql}, $2, $3, $4, $5, $6, $7, $8)
                "#
            );
            if let Err(e) = sqlx::query(&insert_sql)
                .bind(&job.doc_id)
                .bind(job.vector_clock)
                .bind(index as i32)
                .bind(key)
                .bind(&embedded.input.text)
                .bind(&embedded.input.blob)
                .bind(&embedded.input.json)
                .bind(vector)
                .execute(&mut *tx)
                .await
            {
                return JobOutcome::Retry(e.to_string());
            }
        }

        if !to_delete.is_empty() {
            let delete_sql = format!(
                r#"DELETE FROM "{namespace}".{chunks_table} WHERE doc_id = $1::{doc_id_sql} AND chunk_hash = ANY($2)"#
            );
            if let Err(e) = sqlx::query(&delete_sql)
                .bind(&job.doc_id)
                .bind(&to_delete)
                .execute(&mut *tx)
                .await
            {
                return JobOutcome::Retry(e.to_string());
            }
        }

        let bump_sql = format!(
            r#"UPDATE "{namespace}".{chunks_table} SET vector_clock = $2 WHERE doc_id = $1::{doc_id_sql}"#
        );
        if let Err(e) = sqlx::query(&bump_sql)
            .bind(&job.doc_id)
            .bind(job.vector_clock)
            .execute(&mut *tx)
            .await
        {
            return JobOutcome::Retry(e.to_string());
        }

        // Atomic completion gate: ties the chunk swap to the queue's
        // terminal state, gated on the shadow clock still matching this job.
        let gate_sql = format!(
            r#"
            UPDATE "{namespace}".work_queue
            SET status = 'completed', completed_at = now()
            WHERE doc_id = $1 AND vector_clock = $2 AND worker_id = $3
              AND $2 = (SELECT vector_clock FROM "{namespace}".{shadow_table} WHERE doc_id = $1::{doc_id_sql})
            RETURNING id
            "#
        );
        let gated: Option<(i64,)> = match sqlx::query_as(&gate_sql)
            .bind(&job.doc_id)
            .bind(job.vector_clock)
            .bind(self.worker_id)
            .fetch_optional(&mut *tx)
            .await
        {
            Ok(row) => row,
            Err(e) => return JobOutcome::Retry(e.to_string()),
        };

        if gated.is_some() {
            if let Err(e) = tx.commit().await {
                return JobOutcome::Retry(e.to_string());
            }
            return JobOutcome::Completed;
        }

        // Gate failed — roll back and inspect the shadow.
        let _ = tx.rollback().await;

        let shadow_clock: Option<(i64,)> = sqlx::query_as(&format!(
            r#"SELECT vector_clock FROM "{namespace}".{shadow_table} WHERE doc_id = $1::{doc_id_sql}"#
        ))
        .bind(&job.doc_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or(None);

        match shadow_clock {
            Some((clock,)) if clock > job.vector_clock => {
                JobOutcome::Skipped("vector clock no longer latest".to_string())
            }
            _ => JobOutcome::Untouched,
        }
    }

    async fn mark_skipped(&self, job_id: i64, reason: &str) {
        self.update_terminal(job_id, "skipped", reason).await;
    }

    async fn mark_failed(&self, job_id: i64, reason: &str) {
        self.update_terminal(job_id, "failed", reason).await;
    }

    async fn update_terminal(&self, job_id: i64, status: &str, reason: &str) {
        let namespace = self.config.namespace();
        let sql = format!(
            r#"UPDATE "{namespace}".work_queue SET status = $2, error = $3, completed_at = now() WHERE id = $1"#
        );
        if let Err(e) = sqlx::query(&sql)
            .bind(job_id)
            .bind(status)
            .bind(reason)
            .execute(&self.pool)
            .await
        {
            self.log(|| error!(job_id, error = %e, "failed to record terminal job status"));
        }
    }

    async fn mark_retry(&self, job_id: i64, reason: &str) {
        let namespace = self.config.namespace();
        let sql = format!(
            r#"
            UPDATE "{namespace}".work_queue
            SET status = 'pending',
                processing_started_at = NULL,
                worker_id = NULL,
                retry_count = retry_count + 1,
                error = $2
            WHERE id = $1
            "#
        );
        if let Err(e) = sqlx::query(&sql)
            .bind(job_id)
            .bind(reason)
            .execute(&self.pool)
            .await
        {
            self.log(|| error!(job_id, error = %e, "failed to requeue job for retry"));
        }
    }
}
