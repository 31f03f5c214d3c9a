use serde::Serialize;
use std::thread;
use tracing::{debug, warn};

use crate::embed::{EmbedOptions, Embedding, EmbeddingProvider};
use crate::error::{EmbedError, Result};

/// Inner product of two equal-length slices, accumulated in f64.
/// NaN and infinities propagate.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbedError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let sum: f64 = a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum();
    Ok(sum as f32)
}

/// Score two embeddings. For normalized inputs this is cosine similarity
/// in [-1, 1]; otherwise a raw inner product.
pub fn similarity(a: &Embedding, b: &Embedding) -> Result<f32> {
    if a.is_normalized() != b.is_normalized() {
        warn!("comparing a normalized embedding with an unnormalized one; score has no fixed range");
    }
    dot(a.values(), b.values())
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub model: String,
    pub backend: String,
    pub dimensions: usize,
    pub normalized: bool,
    pub score: f32,
}

/// Embed both texts, concurrently, and score them. Any failure aborts
/// the whole comparison.
pub fn compare(
    provider: &dyn EmbeddingProvider,
    text_a: &str,
    text_b: &str,
    options: &EmbedOptions,
) -> Result<Comparison> {
    let (a, b) = thread::scope(|s| {
        let second = s.spawn(|| provider.embed(text_b, options));
        let first = provider.embed(text_a, options);
        let second = second
            .join()
            .unwrap_or_else(|_| Err(EmbedError::Inference("embedding thread panicked".into())));
        (first, second)
    });
    let (a, b) = (a?, b?);
    let score = similarity(&a, &b)?;
    debug!(model = provider.model_name(), score, "compared texts");
    Ok(Comparison {
        model: provider.model_name().to_string(),
        backend: provider.backend().to_string(),
        dimensions: a.dimension(),
        normalized: options.normalize,
        score,
    })
}
