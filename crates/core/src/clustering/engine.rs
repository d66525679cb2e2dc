use super::duplicates::{effective_threshold, group_near_duplicates};
use super::kmeans::{estimate_k, run_kmeans, ClusterCount};
use super::terms::{
    common_tags, dominant_category, dominant_folder, shared_terms, top_terms, COMMON_TAGS_LIMIT,
    TOP_TERMS_LIMIT,
};
use super::{cosine_similarity, fallback_label, Cluster, ClusterMember, MIN_FILES_FOR_CLUSTERING};
use crate::config::{ClusteringConfig, VectorConfig};
use crate::error::{CoreError, CoreResult};
use crate::models::{FileEmbedding, FileMetadata};
use crate::vectorstore::VectorStore;
use chrono::{DateTime, Utc};
use providers::TextGenerationProvider;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Members shown to the text backend when naming a cluster.
const LABEL_SAMPLE_SIZE: usize = 5;
const MAX_LABEL_CHARS: usize = 60;

/// Flat, graph-ready summary of one cluster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub id: usize,
    pub label: String,
    pub member_count: usize,
    pub member_ids: Vec<String>,
    pub top_terms: Vec<String>,
    pub common_tags: Vec<String>,
    pub dominant_folder: Option<String>,
    pub dominant_category: Option<String>,
    pub cohesion: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeFile {
    pub id: String,
    pub name: String,
    pub path: String,
    /// Cluster the file belongs to.
    pub cluster_id: usize,
    /// Similarity to the other cluster's centroid.
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEdge {
    pub source: usize,
    pub target: usize,
    pub similarity: f32,
    pub shared_terms: Vec<String>,
    pub bridge_files: Vec<BridgeFile>,
}

#[derive(Debug, Clone)]
pub struct EdgeOptions {
    pub include_bridge_files: bool,
    /// Per edge and per side.
    pub max_bridge_files: usize,
    pub min_bridge_similarity: f32,
}

impl Default for EdgeOptions {
    fn default() -> Self {
        Self {
            include_bridge_files: false,
            max_bridge_files: 3,
            min_bridge_similarity: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateOptions {
    /// Falls back to the configured threshold; never applied below the safety floor.
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMember {
    pub id: String,
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub members: Vec<DuplicateMember>,
    pub max_similarity: f32,
    pub average_similarity: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub threshold_used: f32,
    pub files_scanned: usize,
    pub comparisons: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRunSummary {
    pub k: usize,
    pub files: usize,
    /// Files left out because their embedding length differed from the corpus.
    pub skipped: usize,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
}

/// A cluster member resolved against the vector store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFile {
    pub id: String,
    pub name: String,
    pub path: String,
    pub metadata: FileMetadata,
}

#[derive(Default)]
struct ClusterState {
    clusters: Vec<Cluster>,
    computed_at: Option<DateTime<Utc>>,
}

/// Groups the stored corpus by embedding similarity and answers graph,
/// membership and duplicate queries over the cached result.
pub struct ClusteringEngine {
    store: Arc<dyn VectorStore>,
    text: Arc<dyn TextGenerationProvider>,
    cfg: ClusteringConfig,
    peek_limit: usize,
    state: RwLock<ClusterState>,
}

impl ClusteringEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        text: Arc<dyn TextGenerationProvider>,
        cfg: ClusteringConfig,
    ) -> Self {
        Self {
            store,
            text,
            cfg,
            peek_limit: VectorConfig::default().peek_limit,
            state: RwLock::new(ClusterState::default()),
        }
    }

    pub fn with_peek_limit(mut self, limit: usize) -> Self {
        self.peek_limit = limit;
        self
    }

    /// Up to `peek_limit` stored files that carry a non-empty embedding.
    ///
    /// A failing store yields an empty list.
    pub async fn get_all_file_embeddings(&self) -> Vec<FileEmbedding> {
        let peek = match self.store.peek_files(self.peek_limit).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to read embeddings from vector store");
                return Vec::new();
            }
        };

        let mut files = Vec::with_capacity(peek.ids.len());
        for ((id, embedding), metadata) in peek
            .ids
            .into_iter()
            .zip(peek.embeddings)
            .zip(peek.metadatas)
        {
            match embedding {
                Some(v) if !v.is_empty() => files.push(FileEmbedding {
                    id,
                    vector: Arc::from(v),
                    metadata,
                }),
                _ => debug!(id = %id, "skipping file without embedding"),
            }
        }
        files
    }

    pub async fn compute_clusters(&self, count: ClusterCount) -> CoreResult<ClusterRunSummary> {
        let mut files = self.get_all_file_embeddings().await;
        if files.len() < MIN_FILES_FOR_CLUSTERING {
            return Err(CoreError::InsufficientFiles {
                required: MIN_FILES_FOR_CLUSTERING,
                found: files.len(),
            });
        }

        let dim = files[0].vector.len();
        let before = files.len();
        files.retain(|f| f.vector.len() == dim);
        let skipped = before - files.len();
        if skipped > 0 {
            warn!(skipped, dim, "ignoring embeddings with a different dimension");
        }
        if files.len() < MIN_FILES_FOR_CLUSTERING {
            return Err(CoreError::InsufficientFiles {
                required: MIN_FILES_FOR_CLUSTERING,
                found: files.len(),
            });
        }

        let n = files.len();
        let k = match count {
            ClusterCount::Auto => estimate_k(n),
            ClusterCount::Fixed(0) => {
                return Err(CoreError::InvalidClusterCount(
                    "k must be at least 1".to_string(),
                ))
            }
            ClusterCount::Fixed(k) => k.min(n),
        };

        let mut rng = match self.cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let vectors: Vec<Arc<[f32]>> = files.iter().map(|f| f.vector.clone()).collect();
        let outcome = run_kmeans(&vectors, k, self.cfg.max_iterations, &mut rng);

        let mut grouped: Vec<Vec<ClusterMember>> = vec![Vec::new(); outcome.centroids.len()];
        for (file, &a) in files.into_iter().zip(&outcome.assignments) {
            grouped[a].push(ClusterMember {
                id: file.id,
                metadata: file.metadata,
                embedding: file.vector,
            });
        }
        let clusters: Vec<Cluster> = grouped
            .into_iter()
            .zip(outcome.centroids)
            .enumerate()
            .map(|(id, (members, centroid))| describe_cluster(id, members, centroid))
            .collect();

        let summary = ClusterRunSummary {
            k: clusters.len(),
            files: n,
            skipped,
            iterations: outcome.iterations,
            converged: outcome.converged,
            inertia: outcome.inertia,
        };
        info!(
            k = summary.k,
            files = n,
            iterations = summary.iterations,
            converged = summary.converged,
            "clusters computed"
        );

        let mut state = self.state.write().await;
        state.clusters = clusters;
        state.computed_at = Some(Utc::now());
        Ok(summary)
    }

    /// Names every cluster through the text backend, falling back to "Cluster N".
    pub async fn generate_labels(&self) -> Vec<String> {
        let (prompts, computed_at) = {
            let state = self.state.read().await;
            let prompts: Vec<String> = state.clusters.iter().map(label_prompt).collect();
            (prompts, state.computed_at)
        };

        let mut labels = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            let label = match self.text.generate_text(prompt).await {
                Ok(resp) => sanitize_label(&resp.response),
                Err(e) => {
                    debug!(cluster = i, error = %e, "label generation unavailable");
                    None
                }
            };
            labels.push(label.unwrap_or_else(|| fallback_label(i)));
        }

        let mut state = self.state.write().await;
        if state.computed_at == computed_at && state.clusters.len() == labels.len() {
            for (cluster, label) in state.clusters.iter_mut().zip(&labels) {
                cluster.label = label.clone();
            }
        } else {
            debug!("clusters changed while labelling; discarding labels");
        }
        labels
    }

    pub async fn is_clusters_stale(&self) -> bool {
        let state = self.state.read().await;
        let Some(at) = state.computed_at else {
            return true;
        };
        if state.clusters.is_empty() {
            return true;
        }
        let age_ms = (Utc::now() - at).num_milliseconds();
        age_ms > (self.cfg.cache_ttl_secs as i64).saturating_mul(1000)
    }

    pub async fn clear_clusters(&self) {
        let mut state = self.state.write().await;
        *state = ClusterState::default();
        debug!("cluster cache cleared");
    }

    pub async fn clusters(&self) -> Vec<Cluster> {
        self.state.read().await.clusters.clone()
    }

    pub async fn computed_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.computed_at
    }

    pub async fn get_clusters_for_graph(&self) -> Vec<ClusterNode> {
        let state = self.state.read().await;
        state
            .clusters
            .iter()
            .map(|c| ClusterNode {
                id: c.id,
                label: c.label.clone(),
                member_count: c.len(),
                member_ids: c.members.iter().map(|m| m.id.clone()).collect(),
                top_terms: c.top_terms.clone(),
                common_tags: c.common_tags.clone(),
                dominant_folder: c.dominant_folder.clone(),
                dominant_category: c.dominant_category.clone(),
                cohesion: c.cohesion,
            })
            .collect()
    }

    /// Edges between every pair of clusters whose centroids are more than `threshold` alike.
    /// A NaN threshold matches nothing.
    pub async fn find_cross_cluster_edges(
        &self,
        threshold: f32,
        options: &EdgeOptions,
    ) -> Vec<ClusterEdge> {
        if threshold.is_nan() {
            warn!("edge threshold is NaN; no edges");
            return Vec::new();
        }
        let clusters = self.clusters().await;
        let mut edges = Vec::new();
        for (i, a) in clusters.iter().enumerate() {
            for b in &clusters[i + 1..] {
                let similarity = cosine_similarity(&a.centroid, &b.centroid);
                if similarity <= threshold {
                    continue;
                }
                let mut bridge_files = Vec::new();
                if options.include_bridge_files {
                    bridge_files.extend(bridges_toward(a, b, options).await);
                    bridge_files.extend(bridges_toward(b, a, options).await);
                }
                edges.push(ClusterEdge {
                    source: a.id,
                    target: b.id,
                    similarity,
                    shared_terms: shared_terms(
                        &a.top_terms,
                        &a.common_tags,
                        &b.top_terms,
                        &b.common_tags,
                    ),
                    bridge_files,
                });
            }
        }
        edges
    }

    /// Current metadata for a cluster's members whose files still exist on disk.
    pub async fn get_cluster_members(&self, cluster_id: usize) -> Vec<MemberFile> {
        let ids: Vec<String> = {
            let state = self.state.read().await;
            match state.clusters.iter().find(|c| c.id == cluster_id) {
                Some(c) => c.members.iter().map(|m| m.id.clone()).collect(),
                None => return Vec::new(),
            }
        };

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let metadata = match self.store.get_file(&id).await {
                Ok(Some(m)) => m,
                Ok(None) => {
                    debug!(id = %id, "cluster member no longer in store");
                    continue;
                }
                Err(e) => {
                    warn!(cluster_id, error = %e, "failed to resolve cluster members");
                    return Vec::new();
                }
            };
            if let Some((name, path)) = existing_file(&metadata).await {
                members.push(MemberFile {
                    id,
                    name,
                    path,
                    metadata,
                });
            }
        }
        members
    }

    pub async fn find_near_duplicates(&self, options: &DuplicateOptions) -> DuplicateReport {
        let threshold =
            effective_threshold(options.threshold.unwrap_or(self.cfg.duplicate_threshold));
        let files = self.get_all_file_embeddings().await;
        let vectors: Vec<Arc<[f32]>> = files.iter().map(|f| f.vector.clone()).collect();
        let scan = group_near_duplicates(&vectors, threshold);
        if scan.truncated {
            warn!(
                comparisons = scan.comparisons,
                "near-duplicate scan stopped at its safety limit"
            );
        }

        let groups = scan
            .groups
            .into_iter()
            .map(|g| DuplicateGroup {
                members: g
                    .members
                    .into_iter()
                    .map(|i| {
                        let f = &files[i];
                        DuplicateMember {
                            id: f.id.clone(),
                            name: f.metadata.resolved_name(),
                            path: f.metadata.resolved_path().map(str::to_string),
                        }
                    })
                    .collect(),
                max_similarity: g.max_similarity,
                average_similarity: g.average_similarity,
            })
            .collect();

        DuplicateReport {
            groups,
            threshold_used: threshold,
            files_scanned: files.len(),
            comparisons: scan.comparisons,
            truncated: scan.truncated,
        }
    }
}

fn describe_cluster(id: usize, members: Vec<ClusterMember>, centroid: Vec<f32>) -> Cluster {
    let metas: Vec<&FileMetadata> = members.iter().map(|m| &m.metadata).collect();
    let cohesion = if members.is_empty() {
        0.0
    } else {
        members
            .iter()
            .map(|m| cosine_similarity(&m.embedding, &centroid))
            .sum::<f32>()
            / members.len() as f32
    };
    Cluster {
        id,
        label: fallback_label(id),
        top_terms: top_terms(metas.iter().copied(), TOP_TERMS_LIMIT),
        common_tags: common_tags(metas.iter().copied(), COMMON_TAGS_LIMIT),
        dominant_folder: dominant_folder(metas.iter().copied()),
        dominant_category: dominant_category(metas.iter().copied()),
        cohesion,
        members,
        centroid,
    }
}

/// Members closest to the centroid first.
fn representatives(cluster: &Cluster, limit: usize) -> Vec<&ClusterMember> {
    let mut ranked: Vec<(&ClusterMember, f32)> = cluster
        .members
        .iter()
        .map(|m| (m, cosine_similarity(&m.embedding, &cluster.centroid)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.into_iter().take(limit).map(|(m, _)| m).collect()
}

fn label_prompt(cluster: &Cluster) -> String {
    let mut prompt = String::from(
        "Suggest a short name (2-4 words) for a group of related files. \
         Reply with the name only.\n\nFiles:\n",
    );
    for m in representatives(cluster, LABEL_SAMPLE_SIZE) {
        let meta = &m.metadata;
        prompt.push_str("- ");
        prompt.push_str(meta.resolved_name().as_deref().unwrap_or(&m.id));
        if let Some(category) = &meta.category {
            prompt.push_str(&format!(" [category: {category}]"));
        }
        if let Some(subject) = &meta.subject {
            prompt.push_str(&format!(" [subject: {subject}]"));
        }
        if !meta.tags.is_empty() {
            prompt.push_str(&format!(" [tags: {}]", meta.tags.join(", ")));
        }
        prompt.push('\n');
    }
    if !cluster.top_terms.is_empty() {
        prompt.push_str(&format!("\nFrequent terms: {}\n", cluster.top_terms.join(", ")));
    }
    prompt
}

fn sanitize_label(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#' || c == '`')
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.chars().take(MAX_LABEL_CHARS).collect())
}

/// Resolved name and path, if the file is still on disk.
async fn existing_file(meta: &FileMetadata) -> Option<(String, String)> {
    let path = meta.resolved_path()?.to_string();
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!(path = %path, "dropping reference to missing file");
        return None;
    }
    let name = meta.resolved_name()?;
    Some((name, path))
}

/// Members of `from` that sit close to the centroid of `to`.
async fn bridges_toward(from: &Cluster, to: &Cluster, options: &EdgeOptions) -> Vec<BridgeFile> {
    let mut candidates: Vec<(&ClusterMember, f32)> = from
        .members
        .iter()
        .map(|m| (m, cosine_similarity(&m.embedding, &to.centroid)))
        .filter(|(_, s)| *s > options.min_bridge_similarity)
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut bridges = Vec::new();
    for (member, similarity) in candidates {
        if bridges.len() >= options.max_bridge_files {
            break;
        }
        if let Some((name, path)) = existing_file(&member.metadata).await {
            bridges.push(BridgeFile {
                id: member.id.clone(),
                name,
                path,
                cluster_id: from.id,
                similarity,
            });
        }
    }
    bridges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectorstore::InMemoryVectorStore;
    use providers::noop::NoopProvider;

    #[test]
    fn labels_are_trimmed_to_their_first_line() {
        assert_eq!(
            sanitize_label("\n  \"Tax Paperwork\"\nbecause these are taxes").as_deref(),
            Some("Tax Paperwork")
        );
        assert_eq!(sanitize_label("  **  "), None);
        assert_eq!(sanitize_label(&"x".repeat(200)).map(|l| l.len()), Some(MAX_LABEL_CHARS));
    }

    #[tokio::test]
    async fn cache_goes_stale_after_its_window() {
        let engine = ClusteringEngine::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(NoopProvider),
            ClusteringConfig::default(),
        );
        assert!(engine.is_clusters_stale().await);

        {
            let mut state = engine.state.write().await;
            state.clusters = vec![describe_cluster(0, Vec::new(), vec![1.0])];
            state.computed_at = Some(Utc::now());
        }
        assert!(!engine.is_clusters_stale().await);

        {
            let mut state = engine.state.write().await;
            state.computed_at = Some(Utc::now() - chrono::Duration::hours(2));
        }
        assert!(engine.is_clusters_stale().await);
    }

    #[test]
    fn representatives_prefer_members_near_the_centroid() {
        let member = |id: &str, v: Vec<f32>| ClusterMember {
            id: id.to_string(),
            metadata: FileMetadata::default(),
            embedding: Arc::from(v),
        };
        let cluster = describe_cluster(
            0,
            vec![
                member("far", vec![0.0, 1.0]),
                member("near", vec![1.0, 0.05]),
                member("mid", vec![1.0, 1.0]),
            ],
            vec![1.0, 0.0],
        );
        let ids: Vec<&str> = representatives(&cluster, 2).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn nan_threshold_yields_no_edges() {
        let engine = ClusteringEngine::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(NoopProvider),
            ClusteringConfig::default(),
        );
        {
            let mut state = engine.state.write().await;
            state.clusters = vec![
                describe_cluster(0, Vec::new(), vec![1.0, 0.0]),
                describe_cluster(1, Vec::new(), vec![1.0, 0.1]),
            ];
            state.computed_at = Some(Utc::now());
        }
        let options = EdgeOptions::default();
        assert_eq!(engine.find_cross_cluster_edges(0.5, &options).await.len(), 1);
        assert!(engine.find_cross_cluster_edges(f32::NAN, &options).await.is_empty());
    }
}
