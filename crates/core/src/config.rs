use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub embeddings: EmbeddingConfig,
    #[serde(default)]
    pub vectors: VectorConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Ceiling on simultaneous inference calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_inference: usize,
    /// Waiters allowed beyond the ceiling before QUEUE_FULL.
    #[serde(default = "default_max_queue")]
    pub max_queue_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_inference: default_max_concurrent(),
            max_queue_size: default_max_queue(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: String::new(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            shutdown_drain_ms: default_shutdown_drain_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Upper bound on embeddings pulled for one clustering run.
    #[serde(default = "default_peek_limit")]
    pub peek_limit: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: None,
            collection: default_collection(),
            peek_limit: default_peek_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Cached clusters older than this are stale.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Fixed seed for k-means++ sampling; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f32,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            cache_ttl_secs: default_cache_ttl_secs(),
            seed: None,
            duplicate_threshold: default_duplicate_threshold(),
            edge_threshold: default_edge_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Text generation backend for cluster labels; labels fall back when unset.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_max_queue() -> usize {
    100
}
fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_probe_timeout_ms() -> u64 {
    10_000
}
fn default_shutdown_drain_ms() -> u64 {
    5_000
}
fn default_vector_provider() -> String {
    "memory".to_string()
}
fn default_collection() -> String {
    "file_embeddings".to_string()
}
fn default_peek_limit() -> usize {
    10_000
}
fn default_max_iterations() -> usize {
    50
}
fn default_cache_ttl_secs() -> u64 {
    30 * 60
}
fn default_duplicate_threshold() -> f32 {
    0.9
}
fn default_edge_threshold() -> f32 {
    0.5
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("SEMCLUSTER")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.coordinator.max_concurrent_inference, 3);
        assert_eq!(cfg.vectors.provider, "memory");
        assert_eq!(cfg.clustering.cache_ttl_secs, 1800);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[coordinator]\nmax_concurrent_inference = 5\n\n[clustering]\nseed = 7"
        )
        .unwrap();
        let cfg = load(file.path().to_str()).unwrap();
        assert_eq!(cfg.coordinator.max_concurrent_inference, 5);
        assert_eq!(cfg.coordinator.max_queue_size, 100);
        assert_eq!(cfg.clustering.seed, Some(7));
    }
}
