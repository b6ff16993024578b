use async_trait::async_trait;

use crate::model::{ChunkInput, EmbeddedChunk};

/// Explicit permanent-failure signal a `ChunkFn`/`EmbedFn` can return to
/// opt out of the default retryable classification. Wrap it in the
/// returned `anyhow::Error`
/// (e.g. `Err(PermanentCallbackError("bad content encoding".into()).into())`);
/// the worker downcasts for it before falling back to the retryable default.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PermanentCallbackError(pub String);

/// User-supplied chunker: splits one source row into an ordered, deterministic
/// sequence of chunks. Treated as an opaque external collaborator.
///
/// Determinism requirement: for the same row content, two invocations must
/// produce the same chunks up to ordering.
#[async_trait]
pub trait ChunkFn: Send + Sync {
    async fn chunk(&self, row: &serde_json::Value) -> anyhow::Result<Vec<ChunkInput>>;
}

/// User-supplied embedder: turns one chunk into a fixed-dimension vector,
/// optionally rewriting its stored payload. May fail; failures default to
/// retryable unless the embedder explicitly signals otherwise via
/// `PermanentCallbackError`.
#[async_trait]
pub trait EmbedFn: Send + Sync {
    async fn embed(&self, chunk: &ChunkInput, index: usize) -> anyhow::Result<EmbeddedChunk>;
}

/// User-supplied (or default) hash function used for chunk deduplication.
/// Must be stable across process restarts.
pub trait HashFn: Send + Sync {
    fn hash(&self, chunk: &ChunkInput) -> String;
}

/// Default hasher: hex digest (MD5) over the stringified non-blob fields,
/// concatenated with a hex digest over the blob's bytes when present.
pub struct DefaultHasher;

impl HashFn for DefaultHasher {
    fn hash(&self, chunk: &ChunkInput) -> String {
        crate::hashing::default_chunk_hash(chunk)
    }
}
