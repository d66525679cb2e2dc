use crate::models::FileMetadata;
use anyhow::Context;
use providers::qdrant::{point_id, QdrantClient, QdrantPoint, RetrievedPoint};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: FileMetadata,
}

/// Parallel arrays as returned by a store peek. An entry may lack an embedding.
#[derive(Debug, Clone, Default)]
pub struct PeekResult {
    pub ids: Vec<String>,
    pub embeddings: Vec<Option<Vec<f32>>>,
    pub metadatas: Vec<FileMetadata>,
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;
    async fn peek_files(&self, limit: usize) -> anyhow::Result<PeekResult>;
    async fn get_file(&self, id: &str) -> anyhow::Result<Option<FileMetadata>>;
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()>;
}

/// Process-local store, kept in insertion order.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn peek_files(&self, limit: usize) -> anyhow::Result<PeekResult> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        let mut out = PeekResult::default();
        for r in records.iter().take(limit) {
            out.ids.push(r.id.clone());
            out.embeddings.push(Some(r.vector.clone()));
            out.metadatas.push(r.metadata.clone());
        }
        Ok(out)
    }

    async fn get_file(&self, id: &str) -> anyhow::Result<Option<FileMetadata>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        Ok(records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.metadata.clone()))
    }

    async fn upsert(&self, new_records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("vector store lock poisoned"))?;
        for record in new_records {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        }
        Ok(())
    }
}

pub struct QdrantStore {
    client: QdrantClient,
}

impl QdrantStore {
    pub fn new(client: QdrantClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> QdrantClient {
        self.client.clone()
    }
}

fn point_metadata(point: &RetrievedPoint) -> FileMetadata {
    point
        .payload
        .clone()
        .and_then(|p| serde_json::from_value(p).ok())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.client
            .collection_info()
            .await
            .context("qdrant collection unavailable")?;
        Ok(())
    }

    async fn peek_files(&self, limit: usize) -> anyhow::Result<PeekResult> {
        let points = self.client.scroll(limit).await.context("qdrant scroll")?;
        let mut out = PeekResult::default();
        for point in points {
            out.ids.push(point.id_string());
            out.embeddings.push(point.dense_vector());
            out.metadatas.push(point_metadata(&point));
        }
        Ok(out)
    }

    async fn get_file(&self, id: &str) -> anyhow::Result<Option<FileMetadata>> {
        let points = self
            .client
            .retrieve(vec![id.to_string()])
            .await
            .context("qdrant retrieve")?;
        Ok(points.first().map(point_metadata))
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let points = records
            .into_iter()
            .map(|r| -> anyhow::Result<QdrantPoint> {
                let payload: HashMap<String, serde_json::Value> =
                    match serde_json::to_value(&r.metadata)? {
                        serde_json::Value::Object(map) => map.into_iter().collect(),
                        _ => HashMap::new(),
                    };
                Ok(QdrantPoint {
                    id: point_id(&r.id),
                    vector: r.vector,
                    payload,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.client.upsert(points).await?;
        Ok(())
    }
}
