//! DDL statement builders for the installer.
//!
//! All DDL is assembled as runtime `sqlx::query` strings rather than
//! `sqlx::query!`/`migrate!`, because table and column names are derived
//! from the sanitized pipeline name at runtime and are not visible to
//! compile-time query checking.

use vectorsync_core::{DocIdKind, PipelineConfig};

pub fn ensure_vector_extension() -> &'static str {
    "CREATE EXTENSION IF NOT EXISTS vector"
}

pub fn create_namespace(namespace: &str) -> String {
    format!(r#"CREATE SCHEMA IF NOT EXISTS "{namespace}""#)
}

pub fn create_config_table(namespace: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{namespace}".config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#
    )
}

pub fn upsert_config(namespace: &str) -> String {
    format!(
        r#"
        INSERT INTO "{namespace}".config (key, value)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
        "#
    )
}

pub fn select_config(namespace: &str) -> String {
    format!(r#"SELECT key, value FROM "{namespace}".config"#)
}

/// The config keys written at install time.
pub fn config_entries(config: &PipelineConfig) -> Vec<(&'static str, String)> {
    vec![
        (
            "source_schema",
            config
                .source_table
                .schema
                .clone()
                .unwrap_or_else(|| "public".to_string()),
        ),
        ("source_table", config.source_table.table.clone()),
        ("id_type", doc_id_kind_key(config.doc_id_kind).to_string()),
        (
            "embedding_dimension",
            config.embedding_dimension.to_string(),
        ),
        ("shadow_table", config.shadow_table()),
        ("chunks_table", config.chunks_table()),
        ("schema_version", config.schema_version.clone()),
    ]
}

pub fn doc_id_kind_key(kind: DocIdKind) -> &'static str {
    match kind {
        DocIdKind::Int4 => "int4",
        DocIdKind::Int8 => "int8",
        DocIdKind::Uuid => "uuid",
        DocIdKind::Text => "text",
    }
}

pub fn create_shadow_table(namespace: &str, shadow_table: &str, source: &str, doc_id_sql: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{namespace}".{shadow_table} (
            id BIGSERIAL PRIMARY KEY,
            doc_id {doc_id_sql} NOT NULL UNIQUE
                REFERENCES {source}(id) ON DELETE CASCADE
                DEFERRABLE INITIALLY DEFERRED,
            vector_clock BIGINT NOT NULL DEFAULT 1
        )
        "#
    )
}

pub fn create_chunks_table(
    namespace: &str,
    chunks_table: &str,
    source: &str,
    doc_id_sql: &str,
    dim: usize,
) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{namespace}".{chunks_table} (
            id BIGSERIAL PRIMARY KEY,
            doc_id {doc_id_sql} NOT NULL
                REFERENCES {source}(id) ON DELETE CASCADE
                DEFERRABLE INITIALLY DEFERRED,
            vector_clock BIGINT NOT NULL,
            index INTEGER NOT NULL,
            chunk_hash TEXT NOT NULL,
            text TEXT,
            blob BYTEA,
            json JSONB,
            embedding vector({dim}) NOT NULL
        )
        "#
    )
}

pub fn create_work_queue_table(namespace: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{namespace}".work_queue (
            id BIGSERIAL PRIMARY KEY,
            doc_id TEXT NOT NULL,
            vector_clock BIGINT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            processing_started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            worker_id UUID,
            error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE (doc_id, vector_clock)
        )
        "#
    )
}

/// Supporting indexes: shadow clock lookups, chunk dedup keys, and the
/// cosine-distance HNSW index over the embedding column.
pub fn create_indexes(namespace: &str, shadow_table: &str, chunks_table: &str, skip_vector_index: bool) -> Vec<String> {
    let mut idx = vec![
        format!(r#"CREATE INDEX IF NOT EXISTS {shadow_table}_vector_clock_idx ON "{namespace}".{shadow_table} (vector_clock)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS {chunks_table}_doc_id_idx ON "{namespace}".{chunks_table} (doc_id)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS {chunks_table}_chunk_hash_idx ON "{namespace}".{chunks_table} (chunk_hash)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS {chunks_table}_vector_clock_idx ON "{namespace}".{chunks_table} (vector_clock)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS {chunks_table}_doc_id_vector_clock_idx ON "{namespace}".{chunks_table} (doc_id, vector_clock)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS {chunks_table}_doc_id_index_idx ON "{namespace}".{chunks_table} (doc_id, index)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS work_queue_status_idx ON "{namespace}".work_queue (status)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS work_queue_doc_id_idx ON "{namespace}".work_queue (doc_id)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS work_queue_vector_clock_idx ON "{namespace}".work_queue (vector_clock)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS work_queue_status_processing_started_at_idx ON "{namespace}".work_queue (status, processing_started_at)"#),
        format!(r#"CREATE INDEX IF NOT EXISTS work_queue_doc_id_vector_clock_desc_idx ON "{namespace}".work_queue (doc_id, vector_clock DESC)"#),
    ];

    if !skip_vector_index {
        idx.push(format!(
            r#"CREATE INDEX IF NOT EXISTS {chunks_table}_embedding_cosine_idx ON "{namespace}".{chunks_table} USING hnsw (embedding vector_cosine_ops)"#
        ));
    }

    idx
}

/// Trigger function + attachment: on INSERT, seed a shadow row at clock=1;
/// on UPDATE, bump the existing row's clock by one.
pub fn create_trigger_function(namespace: &str, shadow_table: &str) -> String {
    format!(
        r#"
        CREATE OR REPLACE FUNCTION "{namespace}".bump_shadow_clock() RETURNS trigger AS $$
        BEGIN
            IF TG_OP = 'INSERT' THEN
                INSERT INTO "{namespace}".{shadow_table} (doc_id, vector_clock)
                VALUES (NEW.id, 1)
                ON CONFLICT (doc_id) DO NOTHING;
            ELSIF TG_OP = 'UPDATE' THEN
                UPDATE "{namespace}".{shadow_table}
                SET vector_clock = vector_clock + 1
                WHERE doc_id = NEW.id;
            END IF;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#
    )
}

pub fn attach_trigger(namespace: &str, source: &str, trigger_name: &str) -> String {
    format!(
        r#"
        DROP TRIGGER IF EXISTS {trigger_name} ON {source};
        CREATE TRIGGER {trigger_name}
        AFTER INSERT OR UPDATE ON {source}
        FOR EACH ROW EXECUTE FUNCTION "{namespace}".bump_shadow_clock()
        "#
    )
}

pub fn trigger_name(namespace: &str) -> String {
    format!("{namespace}_bump_shadow_clock")
}

/// Reconciliation pass: drop orphaned shadow/chunk rows and flush the
/// queue; backfill shadow rows for source rows missing one.
pub fn reconcile_orphans(namespace: &str, shadow_table: &str, chunks_table: &str, source: &str) -> Vec<String> {
    vec![
        format!(
            r#"DELETE FROM "{namespace}".{shadow_table} WHERE doc_id NOT IN (SELECT id FROM {source})"#
        ),
        format!(
            r#"DELETE FROM "{namespace}".{chunks_table} WHERE doc_id NOT IN (SELECT id FROM {source})"#
        ),
        format!(r#"TRUNCATE "{namespace}".work_queue"#),
        format!(
            r#"
            INSERT INTO "{namespace}".{shadow_table} (doc_id, vector_clock)
            SELECT id, 1 FROM {source} s
            WHERE NOT EXISTS (
                SELECT 1 FROM "{namespace}".{shadow_table} sh WHERE sh.doc_id = s.id
            )
            "#
        ),
    ]
}

pub fn destroy_namespace(namespace: &str) -> String {
    format!(r#"DROP SCHEMA IF EXISTS "{namespace}" CASCADE"#)
}

pub fn detach_trigger(source: &str, trigger_name: &str) -> String {
    format!(r#"DROP TRIGGER IF EXISTS {trigger_name} ON {source}"#)
}
