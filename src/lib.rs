//! `vectorsync`: a continuous embedding-pipeline sync engine over
//! PostgreSQL. A `Pipeline` tracks one source table via a trigger-maintained
//! shadow clock, enqueues outdated documents, and drives a pool of workers
//! that re-chunk and re-embed them.
//!
//! ```ignore
//! let config = PipelineConfig::new("docs", "public.articles", 1536);
//! let pipeline = Pipeline::create(pool, config, chunker, embedder, hasher).await?;
//! pipeline.start().await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub use vectorsync_core::{
    backoff, hashing, ChunkFn, ChunkInput, DefaultHasher, DocId, DocIdKind, EmbedFn, EmbeddedChunk,
    HashFn, JobOutcome, JobStatus, PermanentCallbackError, PipelineConfig, PipelineError,
    SourceTable, WorkerTuning,
};
pub use vectorsync_postgres::{admin, ddl, enqueue, installer, rows, worker, WorkQueueRow, Worker};

/// Process-wide cache of live pipeline handles, keyed by name, so repeated
/// `Pipeline::create` calls for the same pipeline return the same handle
/// instead of standing up a second set of worker loops.
static REGISTRY: Lazy<Mutex<HashMap<String, Arc<Pipeline>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

struct RunningLoops {
    shutdown_tx: watch::Sender<bool>,
    enqueue_handle: JoinHandle<()>,
    process_handle: JoinHandle<()>,
}

/// A handle to one installed, named embedding pipeline.
///
/// Cloning is cheap (`Arc`-backed); every clone shares the same worker
/// loops and the same entry in the process-wide registry.
pub struct Pipeline {
    name: String,
    pool: PgPool,
    config: PipelineConfig,
    worker: Arc<Worker>,
    running: Mutex<Option<RunningLoops>>,
}

impl Pipeline {
    /// Install the pipeline's schema (idempotent) and return a handle to
    /// it, registering it under `config.name` so subsequent `create` calls
    /// with the same name return this same handle rather than re-running
    /// the installer.
    pub async fn create(
        pool: PgPool,
        config: PipelineConfig,
        chunker: Arc<dyn ChunkFn>,
        embedder: Arc<dyn EmbedFn>,
        hasher: Arc<dyn HashFn>,
    ) -> Result<Arc<Pipeline>, PipelineError> {
        let name = config.name.clone();

        if let Some(existing) = REGISTRY.lock().unwrap().get(&name) {
            return Ok(Arc::clone(existing));
        }

        installer::install(&pool, &config).await?;

        let worker = Arc::new(Worker::new(
            pool.clone(),
            Arc::new(config.clone()),
            chunker,
            embedder,
            hasher,
        ));

        let pipeline = Arc::new(Pipeline {
            name: name.clone(),
            pool,
            config,
            worker,
            running: Mutex::new(None),
        });

        let mut registry = REGISTRY.lock().unwrap();
        let pipeline = registry.entry(name).or_insert(pipeline).clone();
        Ok(pipeline)
    }

    /// Start the enqueue and process loops, if not already running.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker_enqueue = Arc::clone(&self.worker);
        let rx_enqueue = shutdown_rx.clone();
        let enqueue_handle = tokio::spawn(async move {
            worker_enqueue.run_enqueue_loop(rx_enqueue).await;
        });

        let worker_process = Arc::clone(&self.worker);
        let rx_process = shutdown_rx;
        let process_handle = tokio::spawn(async move {
            worker_process.run_process_loop(rx_process).await;
        });

        *running = Some(RunningLoops {
            shutdown_tx,
            enqueue_handle,
            process_handle,
        });

        info!(pipeline = %self.name, "pipeline started");
    }

    /// Signal both loops to stop and wait for them to finish their current
    /// tick.
    pub async fn stop(&self) {
        let taken = self.running.lock().unwrap().take();
        let Some(loops) = taken else { return };

        let _ = loops.shutdown_tx.send(true);
        let _ = loops.enqueue_handle.await;
        let _ = loops.process_handle.await;

        info!(pipeline = %self.name, "pipeline stopped");
    }

    /// Alias for `stop` — pausing and stopping are identical at the
    /// process level; a paused pipeline simply has no running loops until
    /// `start` is called again.
    pub async fn pause(&self) {
        self.stop().await;
    }

    /// Force every tracked document to be treated as outdated, regardless
    /// of its current shadow/chunk clock agreement.
    pub async fn reprocess_all(&self) -> Result<(), PipelineError> {
        admin::reprocess_all(&self.pool, &self.config).await
    }

    /// Count documents with a pending (not yet completed/failed/skipped)
    /// job in the work queue.
    pub async fn count_remaining_documents(&self) -> Result<i64, PipelineError> {
        admin::count_remaining(&self.pool, &self.config).await
    }

    /// Stop the pipeline's loops, detach its trigger, drop its schema, and
    /// remove it from the process-wide registry.
    pub async fn destroy(&self) -> Result<(), PipelineError> {
        self.stop().await;
        installer::destroy(&self.pool, &self.config).await?;
        REGISTRY.lock().unwrap().remove(&self.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
