use thiserror::Error;

/// Errors surfaced by the pipeline's public API and worker loops.
///
/// Per-job failures are classified via [`PipelineError::retryable`] and
/// never propagate past the worker — they are folded into the work-queue
/// row's `status`/`error`/`retry_count` columns instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid embedding: expected dimension {expected}, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },

    #[error("embedding contains non-finite value at index {index}")]
    NonFiniteEmbedding { index: usize },

    #[error("pipeline schema missing or incomplete: {0}")]
    SchemaMissing(String),

    #[error("pipeline config missing key: {0}")]
    ConfigMissing(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("callback error: {0}")]
    Callback(#[from] anyhow::Error),
}

impl PipelineError {
    /// Classify an error as retryable (temporary) vs. permanent.
    /// Superseded jobs are handled separately as `JobOutcome` and never
    /// reach this classifier.
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::Database(e) => is_retryable_db_error(e),
            PipelineError::InvalidEmbedding { .. } => false,
            PipelineError::NonFiniteEmbedding { .. } => false,
            PipelineError::SchemaMissing(_) => false,
            PipelineError::ConfigMissing(_) => false,
            PipelineError::Permanent(_) => false,
            // A bare callback error doesn't announce itself permanent —
            // default to retryable.
            PipelineError::Callback(_) => true,
        }
    }
}

/// Connection-class, deadlock, and serialization failures are retryable;
/// everything else reported by sqlx (constraint violations, type errors)
/// is treated as permanent.
fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_embedding_is_permanent() {
        let err = PipelineError::InvalidEmbedding {
            expected: 4,
            actual: 5,
        };
        assert!(!err.retryable());
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn callback_error_defaults_retryable() {
        let err = PipelineError::Callback(anyhow::anyhow!("boom"));
        assert!(err.retryable());
    }
}
