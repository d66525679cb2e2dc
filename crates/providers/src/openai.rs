use crate::{
    EmbedResponse, EmbeddingProvider, GenerateResponse, ModelReady, ProviderError,
    TextGenerationProvider,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound on a single HTTP round trip when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub request_timeout: Duration,
}

/// OpenAI-compatible HTTP backend (also works against local servers exposing `/v1`).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
    embedding_model: Arc<RwLock<String>>,
    models: broadcast::Sender<ModelReady>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed(format!("http client: {e}")))?;
        let (models, _) = broadcast::channel(16);
        Ok(Self {
            client,
            embedding_model: Arc::new(RwLock::new(cfg.embedding_model.clone())),
            cfg: Arc::new(cfg),
            models,
        })
    }

    /// Point subsequent embedding calls at `model` and notify subscribers.
    pub fn switch_embedding_model(&self, model: &str) {
        if let Ok(mut current) = self.embedding_model.write() {
            *current = model.to_string();
        }
        tracing::info!(model, "embedding model switched");
        // No receivers is not an error.
        let _ = self.models.send(ModelReady {
            model: model.to_string(),
        });
    }

    fn current_embedding_model(&self) -> String {
        self.embedding_model
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|_| self.cfg.embedding_model.clone())
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::RequestFailed(e.to_string())
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn generate_embedding(&self, text: &str) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a str,
        }

        let model = self.current_embedding_model();
        let body = EmbedRequest {
            model: &model,
            input: text,
        };

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        if !resp.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "embeddings endpoint returned {}",
                resp.status()
            )));
        }

        let parsed: EmbeddingApiResponse = resp.json().await.map_err(request_error)?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::RequestFailed("empty embedding response".into()))?;

        Ok(EmbedResponse {
            embedding,
            model: parsed.model.unwrap_or(model),
        })
    }

    fn subscribe_models(&self) -> Option<broadcast::Receiver<ModelReady>> {
        Some(self.models.subscribe())
    }
}

#[async_trait::async_trait]
impl TextGenerationProvider for OpenAiProvider {
    async fn generate_text(&self, prompt: &str) -> Result<GenerateResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let parsed: ChatApiResponse = resp.json().await.map_err(request_error)?;

        let response = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(GenerateResponse { response })
    }
}
