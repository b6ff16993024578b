//! Idempotent pipeline installer: provisions a pipeline's namespace,
//! tables, indexes, and source trigger.

use sqlx::PgPool;
use tracing::{info, warn};
use vectorsync_core::hashing::content_digest;
use vectorsync_core::{DocIdKind, PipelineConfig, PipelineError};

use crate::ddl;

/// Install (or re-install, as a no-op) a pipeline's namespace, tables,
/// indexes, and source trigger. Wrapped in a single transaction: any
/// failure rolls back the whole attempt.
pub async fn install(pool: &PgPool, config: &PipelineConfig) -> Result<(), PipelineError> {
    let namespace = config.namespace();
    let source = config.source_table.qualified();
    let shadow_table = config.shadow_table();
    let chunks_table = config.chunks_table();
    let doc_id_sql = config.doc_id_kind.sql_type();

    let mut tx = pool.begin().await?;

    // 1. vector extension.
    sqlx::query(ddl::ensure_vector_extension())
        .execute(&mut *tx)
        .await?;

    // 2. namespace.
    sqlx::query(&ddl::create_namespace(&namespace))
        .execute(&mut *tx)
        .await?;

    // 3. config table + upsert.
    sqlx::query(&ddl::create_config_table(&namespace))
        .execute(&mut *tx)
        .await?;
    let upsert_sql = ddl::upsert_config(&namespace);
    let entries = ddl::config_entries(config);
    for (key, value) in &entries {
        sqlx::query(&upsert_sql)
            .bind(*key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    // 4. shadow table.
    sqlx::query(&ddl::create_shadow_table(
        &namespace,
        &shadow_table,
        &source,
        doc_id_sql,
    ))
    .execute(&mut *tx)
    .await?;

    // 5. chunks table.
    sqlx::query(&ddl::create_chunks_table(
        &namespace,
        &chunks_table,
        &source,
        doc_id_sql,
        config.embedding_dimension,
    ))
    .execute(&mut *tx)
    .await?;

    // 6. work queue table.
    sqlx::query(&ddl::create_work_queue_table(&namespace))
        .execute(&mut *tx)
        .await?;

    // 7. indexes.
    for stmt in ddl::create_indexes(
        &namespace,
        &shadow_table,
        &chunks_table,
        config.tuning.skip_embedding_index_setup,
    ) {
        sqlx::query(&stmt).execute(&mut *tx).await?;
    }

    // 8. trigger function + attach.
    sqlx::query(&ddl::create_trigger_function(&namespace, &shadow_table))
        .execute(&mut *tx)
        .await?;
    let trigger_name = ddl::trigger_name(&namespace);
    sqlx::query(&ddl::attach_trigger(&namespace, &source, &trigger_name))
        .execute(&mut *tx)
        .await?;

    // 10. reconciliation pass (tolerates a prior source-table drop+recreate).
    for stmt in ddl::reconcile_orphans(&namespace, &shadow_table, &chunks_table, &source) {
        sqlx::query(&stmt).execute(&mut *tx).await?;
    }

    tx.commit().await?;

    // DDL event hook is best-effort and lives outside the main transaction:
    // missing privileges are a warning, not a failure.
    register_drop_hook(pool, &namespace, &source).await;

    let manifest = entries
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    info!(
        namespace = %namespace,
        source = %source,
        config_digest = %content_digest(&manifest),
        "pipeline installed"
    );
    Ok(())
}

/// Attempt to register an event trigger that drops the pipeline namespace
/// when the source table itself is dropped. Requires superuser-adjacent
/// privileges; a failure here is downgraded to a warning rather than
/// failing the install.
async fn register_drop_hook(pool: &PgPool, namespace: &str, source: &str) {
    let event_trigger_name = format!("{namespace}_drop_cascade");
    let sql = format!(
        r#"
        CREATE OR REPLACE FUNCTION "{namespace}".on_source_dropped() RETURNS event_trigger AS $$
        DECLARE
            obj record;
        BEGIN
            FOR obj IN SELECT * FROM pg_event_trigger_dropped_objects() LOOP
                IF obj.object_identity = '{source}' THEN
                    EXECUTE 'DROP SCHEMA IF EXISTS "{namespace}" CASCADE';
                END IF;
            END LOOP;
        END;
        $$ LANGUAGE plpgsql;

        DROP EVENT TRIGGER IF EXISTS {event_trigger_name};
        CREATE EVENT TRIGGER {event_trigger_name}
            ON sql_drop
            EXECUTE FUNCTION "{namespace}".on_source_dropped();
        "#
    );

    if let Err(e) = sqlx::query(&sql).execute(pool).await {
        warn!(error = %e, namespace = %namespace, "could not register source-drop event trigger (insufficient privileges?) — continuing without it");
    }
}

/// Detach the source trigger and drop the pipeline's namespace entirely.
pub async fn destroy(pool: &PgPool, config: &PipelineConfig) -> Result<(), PipelineError> {
    let namespace = config.namespace();
    let source = config.source_table.qualified();
    let trigger_name = ddl::trigger_name(&namespace);

    let mut tx = pool.begin().await?;
    sqlx::query(&ddl::detach_trigger(&source, &trigger_name))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&ddl::destroy_namespace(&namespace))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(namespace = %namespace, "pipeline destroyed");
    Ok(())
}

/// Read the manifest written at install time, validating that its stored
/// `id_type` still matches what the caller's `PipelineConfig` expects (a
/// mismatch means the pipeline was reconfigured with a different id type
/// without a matching migration, which would corrupt every cast in the
/// worker's generated SQL).
pub async fn get_config(pool: &PgPool, config: &PipelineConfig) -> Result<Vec<(String, String)>, PipelineError> {
    let namespace = config.namespace();
    let rows: Vec<(String, String)> = sqlx::query_as(&ddl::select_config(&namespace))
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        return Err(PipelineError::ConfigMissing(namespace));
    }

    if let Some((_, id_type)) = rows.iter().find(|(k, _)| k == "id_type") {
        let stored_kind = parse_doc_id_kind(id_type)?;
        if stored_kind != config.doc_id_kind {
            return Err(PipelineError::SchemaMissing(format!(
                "pipeline '{}' was installed with id_type '{id_type}', but this config expects {:?}",
                config.name, config.doc_id_kind
            )));
        }
    }

    Ok(rows)
}

/// Resolve the stored `id_type` config key back into a `DocIdKind`,
/// validating that the live manifest matches what the caller expects.
pub fn parse_doc_id_kind(value: &str) -> Result<DocIdKind, PipelineError> {
    match value {
        "int4" => Ok(DocIdKind::Int4),
        "int8" => Ok(DocIdKind::Int8),
        "uuid" => Ok(DocIdKind::Uuid),
        "text" => Ok(DocIdKind::Text),
        other => Err(PipelineError::SchemaMissing(format!(
            "unknown id_type in config: {other}"
        ))),
    }
}
