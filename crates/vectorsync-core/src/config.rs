use std::time::Duration;

/// Scalar type of the source table's `id` column.
///
/// A chunk/shadow row carries exactly one of these, dispatched as a tagged
/// variant at the boundary, the same approach used for chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocIdKind {
    Int4,
    Int8,
    Uuid,
    Text,
}

impl DocIdKind {
    /// The PostgreSQL column type used for `doc_id` foreign-key columns.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DocIdKind::Int4 => "INTEGER",
            DocIdKind::Int8 => "BIGINT",
            DocIdKind::Uuid => "UUID",
            DocIdKind::Text => "TEXT",
        }
    }
}

impl Default for DocIdKind {
    fn default() -> Self {
        DocIdKind::Int8
    }
}

/// Fully-qualified source table reference (`schema.table` or bare `table`,
/// which resolves against the search_path's default schema).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub schema: Option<String>,
    pub table: String,
}

impl SourceTable {
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('.') {
            Some((schema, table)) => SourceTable {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            None => SourceTable {
                schema: None,
                table: spec.to_string(),
            },
        }
    }

    /// Quoted, schema-qualified identifier suitable for embedding in DDL.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.table),
            None => format!("\"{}\"", self.table),
        }
    }
}

/// Sanitize a pipeline name into a PostgreSQL-safe namespace identifier:
/// non-alphanumeric bytes become `_`, and the result is lowercased.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

/// Namespace (PostgreSQL schema) owned exclusively by one pipeline.
pub fn namespace_for(pipeline_name: &str) -> String {
    format!("vectorsync_{}", sanitize_identifier(pipeline_name))
}

/// Tunable knobs for a pipeline's worker loops.
#[derive(Debug, Clone)]
pub struct WorkerTuning {
    pub polling_interval: Duration,
    pub batch_size: u32,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub stalled_job_timeout: Duration,
    pub skip_embedding_index_setup: bool,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        WorkerTuning {
            polling_interval: Duration::from_millis(1_000),
            batch_size: 5,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(1_000),
            stalled_job_timeout: Duration::from_secs(60),
            skip_embedding_index_setup: false,
        }
    }
}

/// Full configuration for one pipeline, assembled by the `create()` call.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub source_table: SourceTable,
    pub doc_id_kind: DocIdKind,
    pub embedding_dimension: usize,
    pub shadow_table_name: Option<String>,
    pub chunks_table_name: Option<String>,
    pub schema_version: String,
    pub tuning: WorkerTuning,
    /// Per-pipeline log sink. When set, the worker's structured log events
    /// are dispatched through it instead of the process's global
    /// subscriber — `tracing::Dispatch::none()` gives silent operation for
    /// this pipeline without affecting any other pipeline or the rest of
    /// the process.
    pub logger: Option<tracing::Dispatch>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, source_table: impl Into<String>, embedding_dimension: usize) -> Self {
        PipelineConfig {
            name: name.into(),
            source_table: SourceTable::parse(&source_table.into()),
            doc_id_kind: DocIdKind::default(),
            embedding_dimension,
            shadow_table_name: None,
            chunks_table_name: None,
            schema_version: "1".to_string(),
            tuning: WorkerTuning::default(),
            logger: None,
        }
    }

    /// Route this pipeline's log events through `dispatch` instead of the
    /// process-global subscriber. Pass `tracing::Dispatch::none()` for
    /// silent mode.
    pub fn with_logger(mut self, dispatch: tracing::Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    pub fn namespace(&self) -> String {
        namespace_for(&self.name)
    }

    pub fn shadow_table(&self) -> String {
        self.shadow_table_name
            .clone()
            .unwrap_or_else(|| "shadow".to_string())
    }

    pub fn chunks_table(&self) -> String {
        self.chunks_table_name
            .clone()
            .unwrap_or_else(|| "chunks".to_string())
    }
}
