use md5::{Digest, Md5};
use sha2::Sha256;

use crate::model::ChunkInput;

/// Default `hashFn`: hex-MD5 over the stringified non-blob fields
/// concatenated with hex-MD5 over the blob's bytes when present.
pub fn default_chunk_hash(chunk: &ChunkInput) -> String {
    let mut fields = String::new();
    if let Some(text) = &chunk.text {
        fields.push_str(text);
    }
    if let Some(json) = &chunk.json {
        fields.push_str(&json.to_string());
    }
    if !chunk.metadata.is_null() {
        fields.push_str(&chunk.metadata.to_string());
    }

    let mut hasher = Md5::new();
    hasher.update(fields.as_bytes());
    let mut digest = hex::encode(hasher.finalize());

    if let Some(blob) = &chunk.blob {
        let mut blob_hasher = Md5::new();
        blob_hasher.update(blob);
        digest.push_str(&hex::encode(blob_hasher.finalize()));
    }

    digest
}

/// Composite dedup key: `hash || "-" || index` (GLOSSARY "Hash key").
pub fn composite_key(hash: &str, index: usize) -> String {
    format!("{hash}-{index}")
}

/// Stable content hash for a pipeline's manifest values, logged at install
/// time so two installs can be compared for config drift without diffing
/// the raw key/value rows. Not part of the chunk dedup discipline.
pub fn content_digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
