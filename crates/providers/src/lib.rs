//! Provider abstractions for embedding and text-generation backends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod hashing;
pub mod noop;
pub mod openai;
pub mod qdrant;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RequestFailed(_) | ProviderError::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f32>,
    /// Identity of the model that produced `embedding`.
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// Broadcast when a backend switches to (or finishes loading) a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReady {
    pub model: String,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<EmbedResponse, ProviderError>;

    /// Readiness notifications for newly available models, if the backend emits them.
    fn subscribe_models(&self) -> Option<broadcast::Receiver<ModelReady>> {
        None
    }
}

#[async_trait::async_trait]
pub trait TextGenerationProvider: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<GenerateResponse, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    generators: HashMap<String, Arc<dyn TextGenerationProvider>>,
    pub preferred_embedding: Option<String>,
    pub preferred_generator: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_generator(mut self, name: &str, provider: Arc<dyn TextGenerationProvider>) -> Self {
        self.generators.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_generator(mut self, name: &str) -> Self {
        self.preferred_generator = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn generator(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn TextGenerationProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_generator.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no text generation provider configured".into())
            })?;
        self.generators
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    /// Text generation backend, or the null provider when none is configured.
    pub fn generator_or_noop(&self, name: Option<&str>) -> Arc<dyn TextGenerationProvider> {
        self.generator(name)
            .unwrap_or_else(|_| Arc::new(noop::NoopProvider) as Arc<dyn TextGenerationProvider>)
    }
}
