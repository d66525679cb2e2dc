use crate::{
    EmbedResponse, EmbeddingProvider, GenerateResponse, ProviderError, TextGenerationProvider,
};

/// Null backend: embeddings are empty, text generation is unavailable.
#[derive(Debug, Default)]
pub struct NoopProvider;

pub const NOOP_MODEL: &str = "noop";

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn generate_embedding(&self, _text: &str) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            embedding: vec![],
            model: NOOP_MODEL.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TextGenerationProvider for NoopProvider {
    async fn generate_text(&self, _prompt: &str) -> Result<GenerateResponse, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
