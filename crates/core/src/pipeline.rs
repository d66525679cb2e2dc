//! Wiring from configuration to running services, plus file ingestion.

use crate::clustering::ClusteringEngine;
use crate::config::AppConfig;
use crate::coordinator::AccessCoordinator;
use crate::embeddings::{BatchItem, EmbeddingService};
use crate::models::FileMetadata;
use crate::vectorstore::{InMemoryVectorStore, QdrantStore, VectorRecord, VectorStore};
use anyhow::Context;
use providers::hashing::HashingProvider;
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider, DEFAULT_REQUEST_TIMEOUT};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::ProviderRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Bytes of file content embedded alongside the file name.
const PREVIEW_BYTES: u64 = 4096;

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", Arc::new(NoopProvider))
        .with_embedding("hashing", Arc::new(HashingProvider::default()))
        .with_generator("noop", Arc::new(NoopProvider));

    if let (Some(key), Some(base)) = (
        std::env::var_os("OPENAI_API_KEY"),
        std::env::var_os("OPENAI_BASE_URL"),
    ) {
        let embedding_model = if config.embeddings.model.is_empty() {
            "text-embedding-3-small".to_string()
        } else {
            config.embeddings.model.clone()
        };
        match OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base.to_string_lossy().into_owned(),
            embedding_model,
            chat_model: config
                .llm
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }) {
            Ok(provider) => {
                reg = reg
                    .with_embedding("openai", Arc::new(provider.clone()))
                    .with_generator("openai", Arc::new(provider));
            }
            Err(e) => warn!(error = %e, "openai backend unavailable"),
        }
    }

    let reg = reg.set_preferred_embedding(&config.embeddings.provider);
    match &config.llm.provider {
        Some(name) => reg.set_preferred_generator(name),
        None => reg,
    }
}

pub fn build_vector_store(config: &AppConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    match config.vectors.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "qdrant" => {
            let url = config
                .vectors
                .url
                .clone()
                .context("vectors.url is required for the qdrant store")?;
            let client = QdrantClient::new(QdrantConfig {
                url,
                collection: config.vectors.collection.clone(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            });
            Ok(Arc::new(QdrantStore::new(client)))
        }
        other => anyhow::bail!("unknown vector store provider: {other}"),
    }
}

pub fn build_embedding_service(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<EmbeddingService> {
    let backend = registry
        .embedding(None)
        .context("embedding provider unavailable")?;
    let coordinator = Arc::new(AccessCoordinator::from_config(&config.coordinator));
    Ok(EmbeddingService::new(
        backend,
        coordinator,
        config.embeddings.clone(),
    ))
}

pub fn build_engine(
    config: &AppConfig,
    store: Arc<dyn VectorStore>,
    registry: &ProviderRegistry,
) -> ClusteringEngine {
    let text = registry.generator_or_noop(config.llm.provider.as_deref());
    ClusteringEngine::new(store, text, config.clustering.clone())
        .with_peek_limit(config.vectors.peek_limit)
}

/// The assembled services for one process.
pub struct Pipeline {
    pub config: AppConfig,
    pub store: Arc<dyn VectorStore>,
    pub embeddings: Arc<EmbeddingService>,
    pub engine: ClusteringEngine,
}

impl Pipeline {
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let registry = build_registry(&config);
        let store = build_vector_store(&config)?;
        store
            .initialize()
            .await
            .context("vector store initialize")?;
        let embeddings = Arc::new(build_embedding_service(&config, &registry)?);
        if embeddings.attach_readiness() {
            debug!("listening for model readiness notifications");
        }
        let engine = build_engine(&config, store.clone(), &registry);
        Ok(Self {
            config,
            store,
            embeddings,
            engine,
        })
    }

    pub async fn ingest(&self, roots: &[PathBuf]) -> anyhow::Result<IngestSummary> {
        let summary = ingest(roots, &self.embeddings, self.store.as_ref()).await?;
        if summary.embedded > 0 {
            self.engine.clear_clusters().await;
        }
        Ok(summary)
    }

    pub async fn shutdown(&self) {
        self.embeddings.shutdown().await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub discovered: usize,
    pub embedded: usize,
    pub failed: usize,
}

struct Document {
    id: String,
    text: String,
    metadata: FileMetadata,
}

/// Walks `roots`, embeds each file's name and leading text, and upserts the vectors.
pub async fn ingest(
    roots: &[PathBuf],
    embeddings: &EmbeddingService,
    store: &dyn VectorStore,
) -> anyhow::Result<IngestSummary> {
    let roots = roots.to_vec();
    let docs = tokio::task::spawn_blocking(move || collect_documents(&roots))
        .await
        .context("file walker task failed")?;

    let mut summary = IngestSummary {
        discovered: docs.len(),
        ..IngestSummary::default()
    };
    if docs.is_empty() {
        return Ok(summary);
    }

    let items = docs
        .iter()
        .map(|d| BatchItem::new(d.id.clone(), d.text.clone()))
        .collect();
    let result = embeddings.batch_embed_texts(items).await;
    for e in &result.errors {
        warn!(id = %e.id, error = %e.message, "embedding failed");
    }

    let mut by_id: HashMap<String, FileMetadata> =
        docs.into_iter().map(|d| (d.id, d.metadata)).collect();
    let records: Vec<VectorRecord> = result
        .results
        .into_iter()
        .filter_map(|item| {
            let metadata = by_id.remove(&item.id)?;
            Some(VectorRecord {
                id: item.id,
                vector: item.vector,
                metadata,
            })
        })
        .collect();

    summary.embedded = records.len();
    summary.failed = result.stats.failed;
    store
        .upsert(records)
        .await
        .context("vector store upsert")?;
    info!(
        discovered = summary.discovered,
        embedded = summary.embedded,
        failed = summary.failed,
        "ingest complete"
    );
    Ok(summary)
}

fn collect_documents(roots: &[PathBuf]) -> Vec<Document> {
    let mut docs = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match read_document(entry.path()) {
                Ok(doc) => docs.push(doc),
                Err(e) => debug!(path = %entry.path().display(), error = %e, "skipping file"),
            }
        }
    }
    docs
}

fn read_document(path: &Path) -> anyhow::Result<Document> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let meta = fs::metadata(&path)?;
    let mut preview = Vec::new();
    fs::File::open(&path)?
        .take(PREVIEW_BYTES)
        .read_to_end(&mut preview)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut text = name.replace(['_', '-', '.'], " ");
    // Binary content adds nothing but noise.
    if !preview.contains(&0) {
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&preview));
    }

    let to_secs = |t: std::io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
    };
    let path_str = path.to_string_lossy().into_owned();
    Ok(Document {
        id: file_id(&path_str),
        text,
        metadata: FileMetadata {
            name: Some(name),
            path: Some(path_str),
            created_at: to_secs(meta.created()),
            updated_at: to_secs(meta.modified()),
            ..FileMetadata::default()
        },
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Point id for a path: the leading 16 bytes of its blake3 digest as a UUID.
pub fn file_id(path: &str) -> String {
    let digest = blake3::hash(path.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest.as_bytes()[..16]);
    Uuid::from_bytes(bytes).to_string()
}
