//! Offline embedding backend based on feature hashing.
//!
//! Tokens are hashed into a fixed number of buckets and the resulting
//! bag-of-words vector is L2-normalized. Quality is far below a neural model,
//! but vectors are deterministic and need no runtime, which makes it usable for
//! local runs without an inference server.

use crate::{EmbedResponse, EmbeddingProvider, ProviderError};

/// Model names are `{HASHING_MODEL}-{dimensions}`, so vectors of different
/// widths or bucketing schemes never share an identity.
pub const HASHING_MODEL: &str = "feature-hashing-blake3";

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimensions: usize,
}

impl HashingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn model_name(&self) -> String {
        format!("{HASHING_MODEL}-{}", self.dimensions)
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            let h = u64::from_le_bytes(head);
            let bucket = (h % self.dimensions as u64) as usize;
            // Sign bit spreads collisions around zero.
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn generate_embedding(&self, text: &str) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            embedding: self.embed_sync(text),
            model: self.model_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_yields_identical_unit_vectors() {
        let provider = HashingProvider::new(64);
        let a = provider.generate_embedding("quarterly tax report").await.unwrap();
        let b = provider.generate_embedding("Quarterly TAX report").await.unwrap();
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.embedding.len(), 64);
        let norm: f32 = a.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn model_identity_carries_scheme_and_width() {
        let out = HashingProvider::new(32).generate_embedding("budget").await.unwrap();
        assert_eq!(out.model, "feature-hashing-blake3-32");
        assert_eq!(HashingProvider::default().model_name(), "feature-hashing-blake3-256");

        // Same token, same bucket across instances.
        let again = HashingProvider::new(32).generate_embedding("budget").await.unwrap();
        assert_eq!(out.embedding, again.embedding);
        assert_eq!(out.embedding.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[tokio::test]
    async fn text_without_tokens_is_a_zero_vector() {
        let provider = HashingProvider::new(8);
        let out = provider.generate_embedding("- ! ?").await.unwrap();
        assert!(out.embedding.iter().all(|v| *v == 0.0));
    }
}
