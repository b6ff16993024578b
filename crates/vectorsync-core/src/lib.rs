//! Domain types, configuration, and callback ports for the vectorsync
//! embedding-pipeline engine. This crate runs no queries itself — it only
//! depends on `sqlx` to classify `sqlx::Error` as retryable or permanent.
//! The PostgreSQL-backed implementation lives in `vectorsync-postgres`.

pub mod backoff;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod hashing;
pub mod model;

pub use callbacks::{ChunkFn, DefaultHasher, EmbedFn, HashFn, PermanentCallbackError};
pub use config::{DocIdKind, PipelineConfig, SourceTable, WorkerTuning};
pub use error::PipelineError;
pub use model::{ChunkInput, DocId, EmbeddedChunk, JobOutcome, JobStatus};
