//! End-to-end tests against a live PostgreSQL instance with the `vector`
//! extension installed.
//!
//! Run with:
//!   VECTORSYNC_TEST_DATABASE_URL="postgresql:///postgres" cargo test \
//!       --test pipeline_integration -- --ignored --nocapture

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use vectorsync_core::{ChunkFn, ChunkInput, DefaultHasher, EmbedFn, EmbeddedChunk, PipelineConfig};
use vectorsync_postgres::{admin, enqueue, installer, worker::Worker};

/// Holds an isolated scratch database for the duration of one test.
struct IsolatedDb {
    pool: PgPool,
    dbname: String,
    admin: PgPool,
}

async fn isolated_db() -> IsolatedDb {
    let admin_url = std::env::var("VECTORSYNC_TEST_DATABASE_URL")
        .expect("VECTORSYNC_TEST_DATABASE_URL must be set for integration tests");

    let dbname = format!("vectorsync_test_{}", uuid::Uuid::new_v4().simple());

    let admin_opts = PgConnectOptions::from_str(&admin_url).expect("admin_url parse failed");
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(admin_opts)
        .await
        .expect("admin connect failed");

    sqlx::query(&format!(r#"CREATE DATABASE "{dbname}""#))
        .execute(&admin)
        .await
        .expect("CREATE DATABASE failed");

    let test_opts = PgConnectOptions::from_str(&admin_url)
        .expect("admin_url parse failed")
        .database(&dbname);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(test_opts)
        .await
        .expect("test db connect failed");

    IsolatedDb { pool, dbname, admin }
}

async fn drop_db(iso: IsolatedDb) {
    iso.pool.close().await;
    let _ = sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{}" WITH (FORCE)"#, iso.dbname))
        .execute(&iso.admin)
        .await;
    iso.admin.close().await;
}

async fn create_articles_table(pool: &PgPool) {
    sqlx::query(
        r#"
        CREATE TABLE articles (
            id BIGSERIAL PRIMARY KEY,
            content TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .expect("create articles table");
}

struct WordChunker;

#[async_trait]
impl ChunkFn for WordChunker {
    async fn chunk(&self, row: &serde_json::Value) -> anyhow::Result<Vec<ChunkInput>> {
        let content = row.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(content.split_whitespace().map(ChunkInput::text).collect())
    }
}

/// Deterministic fake embedder: a 4-dimensional vector derived from the
/// chunk's byte length, so repeated embeddings of the same text are stable
/// without pulling in a real model.
struct FakeEmbedder {
    dim: usize,
}

#[async_trait]
impl EmbedFn for FakeEmbedder {
    async fn embed(&self, chunk: &ChunkInput, index: usize) -> anyhow::Result<EmbeddedChunk> {
        let len = chunk.text.as_deref().map(str::len).unwrap_or(0) as f32;
        let mut embedding = vec![0.0f32; self.dim];
        embedding[0] = len;
        embedding[index % self.dim] += 1.0;
        Ok(EmbeddedChunk {
            input: chunk.clone(),
            embedding,
        })
    }
}

fn test_config(dim: usize) -> PipelineConfig {
    let mut config = PipelineConfig::new("articles_pipeline", "public.articles", dim);
    config.tuning.skip_embedding_index_setup = true;
    config
}

/// Wraps `FakeEmbedder`, counting how many chunks actually reach `embed` —
/// used to assert that unchanged chunks are never re-embedded.
struct CountingEmbedder {
    inner: FakeEmbedder,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbedFn for CountingEmbedder {
    async fn embed(&self, chunk: &ChunkInput, index: usize) -> anyhow::Result<EmbeddedChunk> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(chunk, index).await
    }
}

/// Always returns a vector one dimension short of whatever the pipeline
/// expects, to exercise the invalid-embedding-dimension failure path.
struct WrongDimensionEmbedder {
    dim: usize,
}

#[async_trait]
impl EmbedFn for WrongDimensionEmbedder {
    async fn embed(&self, chunk: &ChunkInput, index: usize) -> anyhow::Result<EmbeddedChunk> {
        let len = chunk.text.as_deref().map(str::len).unwrap_or(0) as f32;
        let mut embedding = vec![0.0f32; self.dim.saturating_sub(1)];
        if !embedding.is_empty() {
            embedding[0] = len;
        }
        let _ = index;
        Ok(EmbeddedChunk {
            input: chunk.clone(),
            embedding,
        })
    }
}

async fn work_queue_row(pool: &PgPool, config: &PipelineConfig, doc_id: i64) -> Vec<(i64, String, Option<String>, i32)> {
    let namespace = config.namespace();
    sqlx::query_as(&format!(
        r#"SELECT vector_clock, status, error, retry_count FROM "{namespace}".work_queue WHERE doc_id = $1 ORDER BY vector_clock"#
    ))
    .bind(doc_id.to_string())
    .fetch_all(pool)
    .await
    .expect("work_queue lookup failed")
}

#[tokio::test]
#[ignore]
async fn install_creates_schema_and_config() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);

    installer::install(&iso.pool, &config).await.expect("install failed");
    let entries = installer::get_config(&iso.pool, &config).await.expect("get_config failed");
    assert!(entries.iter().any(|(k, v)| k == "embedding_dimension" && v == "4"));

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn insert_enqueues_and_worker_embeds_chunks() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    sqlx::query("INSERT INTO articles (content) VALUES ('hello world from vectorsync')")
        .execute(&iso.pool)
        .await
        .expect("insert article");

    let enqueued = enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    assert_eq!(enqueued, 1, "one outdated document should be enqueued");

    let worker = Worker::new(
        iso.pool.clone(),
        Arc::new(config.clone()),
        Arc::new(WordChunker),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(DefaultHasher),
    );

    let claimed = worker.tick().await.expect("tick failed");
    assert_eq!(claimed, 1, "the one enqueued job should be claimed and processed");

    let namespace = config.namespace();
    let chunks_table = config.chunks_table();
    let (chunk_count,): (i64,) = sqlx::query_as(&format!(
        r#"SELECT COUNT(*) FROM "{namespace}".{chunks_table}"#
    ))
    .fetch_one(&iso.pool)
    .await
    .expect("count chunks failed");
    assert_eq!(chunk_count, 4, "\"hello world from vectorsync\" splits into 4 word chunks");

    let remaining = admin::count_remaining(&iso.pool, &config).await.expect("count_remaining failed");
    assert_eq!(remaining, 0, "the job should be completed, not pending, after a successful tick");

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn reprocess_all_marks_every_document_outdated() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    sqlx::query("INSERT INTO articles (content) VALUES ('a'), ('b'), ('c')")
        .execute(&iso.pool)
        .await
        .expect("insert articles");

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    admin::reprocess_all(&iso.pool, &config).await.expect("reprocess_all failed");

    let enqueued_again = enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    assert_eq!(enqueued_again, 3, "bumping every shadow clock should make every document outdated again");

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn destroy_drops_the_pipeline_namespace() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    installer::destroy(&iso.pool, &config).await.expect("destroy failed");

    let namespace = config.namespace();
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(&namespace)
    .fetch_one(&iso.pool)
    .await
    .expect("schema existence check failed");
    assert!(!exists);

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn older_job_is_superseded_by_a_newer_one() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    let (doc_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (content) VALUES ('first version') RETURNING id")
            .fetch_one(&iso.pool)
            .await
            .expect("insert article");

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");

    sqlx::query("UPDATE articles SET content = 'second version' WHERE id = $1")
        .bind(doc_id)
        .execute(&iso.pool)
        .await
        .expect("update article");

    let enqueued = enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    assert_eq!(enqueued, 1, "the bumped clock should enqueue a second, newer job for the same document");

    let worker = Worker::new(
        iso.pool.clone(),
        Arc::new(config.clone()),
        Arc::new(WordChunker),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(DefaultHasher),
    );
    let claimed = worker.tick().await.expect("tick failed");
    assert_eq!(claimed, 2, "both the stale and current jobs should be claimed together");

    let rows = work_queue_row(&iso.pool, &config, doc_id).await;
    assert_eq!(rows.len(), 2);
    let (older_clock, older_status, older_error, _) = &rows[0];
    let (newer_clock, newer_status, _, _) = &rows[1];
    assert!(older_clock < newer_clock);
    assert_eq!(older_status, "skipped");
    assert!(older_error.as_deref().unwrap_or_default().contains("newer job"));
    assert_eq!(newer_status, "completed");

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn unchanged_chunks_are_not_reembedded() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    let (doc_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (content) VALUES ('alpha beta') RETURNING id")
            .fetch_one(&iso.pool)
            .await
            .expect("insert article");

    let calls = Arc::new(AtomicUsize::new(0));
    let make_worker = |calls: Arc<AtomicUsize>| {
        Worker::new(
            iso.pool.clone(),
            Arc::new(config.clone()),
            Arc::new(WordChunker),
            Arc::new(CountingEmbedder {
                inner: FakeEmbedder { dim: 4 },
                calls: calls.clone(),
            }),
            Arc::new(DefaultHasher),
        )
    };

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    make_worker(calls.clone()).tick().await.expect("tick failed");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "both words should be embedded the first time");

    // Rewrite with identical content: the trigger still bumps the shadow
    // clock, but every chunk hash is unchanged.
    sqlx::query("UPDATE articles SET content = 'alpha beta' WHERE id = $1")
        .bind(doc_id)
        .execute(&iso.pool)
        .await
        .expect("no-op rewrite");
    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    make_worker(calls.clone()).tick().await.expect("tick failed");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "re-processing identical chunks must not re-embed them");

    // Rewrite with one genuinely new word appended.
    sqlx::query("UPDATE articles SET content = 'alpha beta gamma' WHERE id = $1")
        .bind(doc_id)
        .execute(&iso.pool)
        .await
        .expect("real rewrite");
    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");
    make_worker(calls.clone()).tick().await.expect("tick failed");
    assert_eq!(calls.load(Ordering::SeqCst), 3, "exactly one new chunk should be embedded");

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn deleted_document_is_skipped() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    let (doc_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (content) VALUES ('will be deleted') RETURNING id")
            .fetch_one(&iso.pool)
            .await
            .expect("insert article");

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");

    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(doc_id)
        .execute(&iso.pool)
        .await
        .expect("delete article");

    let worker = Worker::new(
        iso.pool.clone(),
        Arc::new(config.clone()),
        Arc::new(WordChunker),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(DefaultHasher),
    );
    worker.tick().await.expect("tick failed");

    let rows = work_queue_row(&iso.pool, &config, doc_id).await;
    assert_eq!(rows.len(), 1);
    let (_, status, error, _) = &rows[0];
    assert_eq!(status, "skipped");
    assert!(error.as_deref().unwrap_or_default().contains("document deleted"));

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn a_second_worker_reclaims_a_stalled_job() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let mut config = test_config(4);
    config.tuning.stalled_job_timeout = Duration::from_secs(1);
    installer::install(&iso.pool, &config).await.expect("install failed");

    let (doc_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (content) VALUES ('owned by a dead worker') RETURNING id")
            .fetch_one(&iso.pool)
            .await
            .expect("insert article");

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");

    let namespace = config.namespace();
    let dead_worker_id = uuid::Uuid::new_v4();
    sqlx::query(&format!(
        r#"UPDATE "{namespace}".work_queue
           SET status = 'processing', processing_started_at = now() - interval '1 hour', worker_id = $1
           WHERE doc_id = $2"#
    ))
    .bind(dead_worker_id)
    .bind(doc_id.to_string())
    .execute(&iso.pool)
    .await
    .expect("simulate stalled claim");

    let second_worker = Worker::new(
        iso.pool.clone(),
        Arc::new(config.clone()),
        Arc::new(WordChunker),
        Arc::new(FakeEmbedder { dim: 4 }),
        Arc::new(DefaultHasher),
    );
    assert_ne!(second_worker.worker_id(), dead_worker_id);

    let claimed = second_worker.tick().await.expect("tick failed");
    assert_eq!(claimed, 1, "the stalled job should be reclaimed and processed");

    let rows = work_queue_row(&iso.pool, &config, doc_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, "completed");

    drop_db(iso).await;
}

#[tokio::test]
#[ignore]
async fn dimension_mismatch_fails_without_retrying() {
    let iso = isolated_db().await;
    create_articles_table(&iso.pool).await;
    let config = test_config(4);
    installer::install(&iso.pool, &config).await.expect("install failed");

    let (doc_id,): (i64,) =
        sqlx::query_as("INSERT INTO articles (content) VALUES ('mismatched dimensions') RETURNING id")
            .fetch_one(&iso.pool)
            .await
            .expect("insert article");

    enqueue::enqueue_pending(&iso.pool, &config, 10).await.expect("enqueue failed");

    let worker = Worker::new(
        iso.pool.clone(),
        Arc::new(config.clone()),
        Arc::new(WordChunker),
        Arc::new(WrongDimensionEmbedder { dim: 4 }),
        Arc::new(DefaultHasher),
    );
    worker.tick().await.expect("tick failed");

    let rows = work_queue_row(&iso.pool, &config, doc_id).await;
    assert_eq!(rows.len(), 1);
    let (_, status, error, retry_count) = &rows[0];
    assert_eq!(status, "failed");
    assert_eq!(*retry_count, 0, "a dimension mismatch is permanent and must not consume a retry");
    assert!(error.as_deref().unwrap_or_default().contains("dimension"));

    drop_db(iso).await;
}
