use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    cfg: QdrantConfig,
}

impl QdrantClient {
    pub fn new(cfg: QdrantConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn points_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/points{}",
            self.cfg.url, self.cfg.collection, suffix
        )
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ProviderError> {
        let mut builder = builder;
        if let Some(key) = &self.cfg.api_key {
            builder = builder.header("api-key", key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(ProviderError::RequestFailed(format!(
                "status {} body {:?}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))
    }

    /// Confirms the collection is reachable.
    pub async fn collection_info(&self) -> Result<QdrantResponse, ProviderError> {
        let url = format!("{}/collections/{}", self.cfg.url, self.cfg.collection);
        self.send(self.client.get(url)).await
    }

    /// First page of points with payloads and vectors.
    pub async fn scroll(&self, limit: usize) -> Result<Vec<RetrievedPoint>, ProviderError> {
        #[derive(Serialize)]
        struct ScrollRequest {
            limit: usize,
            with_payload: bool,
            with_vector: bool,
        }
        #[derive(Deserialize)]
        struct ScrollResult {
            points: Vec<RetrievedPoint>,
        }
        #[derive(Deserialize)]
        struct ScrollResponse {
            result: ScrollResult,
        }

        let body = ScrollRequest {
            limit,
            with_payload: true,
            with_vector: true,
        };
        let parsed: ScrollResponse = self
            .send(self.client.post(self.points_url("/scroll")).json(&body))
            .await?;
        tracing::debug!(
            collection = %self.cfg.collection,
            points = parsed.result.points.len(),
            "scrolled points"
        );
        Ok(parsed.result.points)
    }

    pub async fn retrieve(&self, ids: Vec<String>) -> Result<Vec<RetrievedPoint>, ProviderError> {
        #[derive(Deserialize)]
        struct RetrieveResponse {
            result: Vec<RetrievedPoint>,
        }

        let body = RetrieveRequest::new(&ids);
        let parsed: RetrieveResponse = self
            .send(self.client.post(self.points_url("")).json(&body))
            .await?;
        Ok(parsed.result)
    }

    pub async fn upsert(&self, points: Vec<QdrantPoint>) -> Result<(), ProviderError> {
        let req = QdrantUpsert { points };
        let _: QdrantResponse = self
            .send(self.client.put(self.points_url("")).json(&req))
            .await?;
        Ok(())
    }
}

/// Qdrant point ids are unsigned integers or UUIDs; numeric strings go back out as numbers.
pub fn point_id(id: &str) -> serde_json::Value {
    id.parse::<u64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::String(id.to_string()))
}

#[derive(Debug, Serialize)]
struct RetrieveRequest {
    ids: Vec<serde_json::Value>,
    with_payload: bool,
    with_vector: bool,
}

impl RetrieveRequest {
    fn new(ids: &[String]) -> Self {
        Self {
            ids: ids.iter().map(|id| point_id(id)).collect(),
            with_payload: true,
            with_vector: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QdrantUpsert {
    pub points: Vec<QdrantPoint>,
}

#[derive(Debug, Serialize)]
pub struct QdrantPoint {
    pub id: serde_json::Value,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct QdrantResponse {
    pub status: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RetrievedPoint {
    pub id: serde_json::Value,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub vector: Option<serde_json::Value>,
}

impl RetrievedPoint {
    /// Point id as a string, whether Qdrant stored it as a UUID or an integer.
    pub fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Unnamed dense vector, if one was returned.
    pub fn dense_vector(&self) -> Option<Vec<f32>> {
        self.vector
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
