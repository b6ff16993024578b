use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scalar value of a source row's `id`, dispatched as a tagged variant at
/// the boundary (see `DocIdKind`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum DocId {
    Int4(i32),
    Int8(i64),
    Uuid(Uuid),
    Text(String),
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocId::Int4(v) => write!(f, "{v}"),
            DocId::Int8(v) => write!(f, "{v}"),
            DocId::Uuid(v) => write!(f, "{v}"),
            DocId::Text(v) => write!(f, "{v}"),
        }
    }
}

/// One chunk produced by the user's chunker, before embedding.
///
/// Carries exactly one of text / blob / structured payload plus optional
/// siblings (a chunk may, e.g., carry both `text` for display and `json`
/// metadata) and free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInput {
    pub text: Option<String>,
    pub blob: Option<Vec<u8>>,
    pub json: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ChunkInput {
    pub fn text(text: impl Into<String>) -> Self {
        ChunkInput {
            text: Some(text.into()),
            blob: None,
            json: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Output of the user's embedder for a single chunk.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub input: ChunkInput,
    pub embedding: Vec<f32>,
}

/// Work-queue lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Outcome of processing one claimed job, consumed only by the worker loop
/// — never surfaced through `PipelineError` to callers.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Skipped(String),
    Retry(String),
    Failed(String),
    /// The completion gate found another worker's claim still in flight.
    /// The job row is left untouched; its new owner will progress it.
    Untouched,
}
