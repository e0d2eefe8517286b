//! Embedding model boundary.
//!
//! The corpus only needs "a batch of strings in, one fixed-size vector per
//! string out, in order".  [`HashingEmbedder`] is a deterministic default
//! that needs no model files: it hashes word features into a fixed number of
//! buckets and L2-normalizes the result.

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::AppError;
use crate::models::Embedding;
use crate::retry::RetryPolicy;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.  Resource exhaustion is reported
    /// as [`AppError::EmbeddingExhausted`] and the batch may be resubmitted.
    fn encode(&self, batch: &[String]) -> Result<Vec<Embedding>, AppError>;
}

/// How backfills feed the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// Rows encoded (and held in memory) per round.
    pub batch_size: usize,
    /// Resubmission policy for exhausted batches.
    pub retry: RetryPolicy,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { batch_size: 64, retry: RetryPolicy { max_attempts: 3, ..RetryPolicy::default() } }
    }
}

/// Encode `batch`, resubmitting it while the model reports exhaustion, and
/// check the shape of what comes back.
pub fn encode_batch(
    embedder: &dyn Embedder,
    batch: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<Embedding>, AppError> {
    let vectors = policy.run(
        "embed",
        |e| matches!(e, AppError::EmbeddingExhausted(_)),
        |e, attempts| AppError::Embedding(format!("gave up after {attempts} attempts: {e}")),
        |_| embedder.encode(batch),
    )?;
    if vectors.len() != batch.len() {
        return Err(AppError::Embedding(format!(
            "model returned {} vectors for {} inputs",
            vectors.len(),
            batch.len()
        )));
    }
    let dims = embedder.dimensions();
    if let Some(bad) = vectors.iter().find(|v| v.dims() != dims) {
        return Err(AppError::InvalidEmbedding(format!(
            "expected {dims} dimensions, got {}",
            bad.dims()
        )));
    }
    Ok(vectors)
}

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Result<Self, AppError> {
        if dims == 0 {
            return Err(AppError::Config("embedding.dimensions must be at least 1".into()));
        }
        Ok(Self { dims })
    }

    fn encode_one(&self, text: &str) -> Embedding {
        let mut v = vec![0f32; self.dims];
        for word in text.unicode_words() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Embedding(v)
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    fn encode(&self, batch: &[String]) -> Result<Vec<Embedding>, AppError> {
        Ok(batch.iter().map(|t| self.encode_one(t)).collect())
    }
}
