use clustering_core::clustering::{ClusterCount, ClusteringEngine, DuplicateOptions, EdgeOptions};
use clustering_core::config::ClusteringConfig;
use clustering_core::error::CoreError;
use clustering_core::models::FileMetadata;
use clustering_core::vectorstore::{InMemoryVectorStore, PeekResult, VectorRecord, VectorStore};
use providers::noop::NoopProvider;
use providers::{GenerateResponse, ProviderError, TextGenerationProvider};
use std::path::Path;
use std::sync::{Arc, Mutex};

struct FailingText;

#[async_trait::async_trait]
impl TextGenerationProvider for FailingText {
    async fn generate_text(&self, _prompt: &str) -> Result<GenerateResponse, ProviderError> {
        Err(ProviderError::RequestFailed("backend offline".into()))
    }
}

struct FixedText(&'static str);

#[async_trait::async_trait]
impl TextGenerationProvider for FixedText {
    async fn generate_text(&self, _prompt: &str) -> Result<GenerateResponse, ProviderError> {
        Ok(GenerateResponse {
            response: self.0.to_string(),
        })
    }
}

struct FailingStore;

#[async_trait::async_trait]
impl VectorStore for FailingStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }
    async fn peek_files(&self, _limit: usize) -> anyhow::Result<PeekResult> {
        anyhow::bail!("connection refused")
    }
    async fn get_file(&self, _id: &str) -> anyhow::Result<Option<FileMetadata>> {
        anyhow::bail!("connection refused")
    }
    async fn upsert(&self, _records: Vec<VectorRecord>) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

/// In-memory store whose lookups of one id can be made to fail after the fact.
#[derive(Default)]
struct FlakyLookups {
    inner: InMemoryVectorStore,
    broken: Mutex<Option<String>>,
}

impl FlakyLookups {
    fn break_lookups_of(&self, id: &str) {
        *self.broken.lock().unwrap() = Some(id.to_string());
    }
}

#[async_trait::async_trait]
impl VectorStore for FlakyLookups {
    async fn initialize(&self) -> anyhow::Result<()> {
        self.inner.initialize().await
    }
    async fn peek_files(&self, limit: usize) -> anyhow::Result<PeekResult> {
        self.inner.peek_files(limit).await
    }
    async fn get_file(&self, id: &str) -> anyhow::Result<Option<FileMetadata>> {
        if self.broken.lock().unwrap().as_deref() == Some(id) {
            anyhow::bail!("read timed out");
        }
        self.inner.get_file(id).await
    }
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        self.inner.upsert(records).await
    }
}

fn meta(name: &str, tags: &[&str]) -> FileMetadata {
    FileMetadata {
        name: Some(name.to_string()),
        path: Some(format!("/nonexistent/{name}")),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..FileMetadata::default()
    }
}

fn record(id: &str, vector: Vec<f32>, metadata: FileMetadata) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        vector,
        metadata,
    }
}

fn seeded() -> ClusteringConfig {
    ClusteringConfig {
        seed: Some(7),
        ..ClusteringConfig::default()
    }
}

async fn engine_with(
    records: Vec<VectorRecord>,
    text: Arc<dyn TextGenerationProvider>,
) -> ClusteringEngine {
    let store = Arc::new(InMemoryVectorStore::new());
    store.upsert(records).await.unwrap();
    ClusteringEngine::new(store, text, seeded())
}

/// Two well separated groups, tagged per group.
fn two_groups(a_tags: &[&str], b_tags: &[&str]) -> Vec<VectorRecord> {
    vec![
        record("a1", vec![1.0, 0.0, 0.0], meta("a1.txt", a_tags)),
        record("a2", vec![0.95, 0.05, 0.0], meta("a2.txt", a_tags)),
        record("a3", vec![0.9, 0.1, 0.0], meta("a3.txt", a_tags)),
        record("b1", vec![0.0, 0.0, 1.0], meta("b1.txt", b_tags)),
        record("b2", vec![0.0, 0.05, 0.95], meta("b2.txt", b_tags)),
    ]
}

fn cluster_of<'a>(
    clusters: &'a [clustering_core::clustering::Cluster],
    member: &str,
) -> &'a clustering_core::clustering::Cluster {
    clusters
        .iter()
        .find(|c| c.members.iter().any(|m| m.id == member))
        .unwrap()
}

#[tokio::test]
async fn five_files_split_into_two_non_empty_clusters() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    let summary = engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    assert_eq!(summary.k, 2);
    assert_eq!(summary.files, 5);

    let clusters = engine.clusters().await;
    assert_eq!(clusters.len(), 2);
    assert!(clusters.iter().all(|c| !c.is_empty()));
    let a = cluster_of(&clusters, "a1");
    assert_eq!(a.len(), 3);
    assert!(a.cohesion > 0.9);
}

#[tokio::test]
async fn too_few_files_is_an_explicit_failure() {
    let engine = engine_with(
        vec![record("only", vec![1.0, 0.0], meta("only.txt", &[]))],
        Arc::new(NoopProvider),
    )
    .await;
    let err = engine
        .compute_clusters(ClusterCount::Fixed(2))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InsufficientFiles { found: 1, .. }));
    assert!(err.to_string().contains("at least 3 files"));
    assert_eq!(err.code(), "INSUFFICIENT_FILES");
}

#[tokio::test]
async fn files_without_embeddings_do_not_count() {
    let engine = engine_with(
        vec![
            record("a", vec![1.0, 0.0], meta("a.txt", &[])),
            record("b", vec![0.0, 1.0], meta("b.txt", &[])),
            record("empty", Vec::new(), meta("empty.txt", &[])),
        ],
        Arc::new(NoopProvider),
    )
    .await;
    assert_eq!(engine.get_all_file_embeddings().await.len(), 2);
    assert!(engine.compute_clusters(ClusterCount::Auto).await.is_err());
}

#[tokio::test]
async fn zero_clusters_is_rejected() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    let err = engine
        .compute_clusters(ClusterCount::Fixed(0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_CLUSTER_COUNT");
}

#[tokio::test]
async fn auto_k_clusters_small_corpora() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    let summary = engine.compute_clusters(ClusterCount::Auto).await.unwrap();
    assert_eq!(summary.k, 2);
}

#[tokio::test]
async fn labels_fall_back_when_the_text_backend_fails_or_is_absent() {
    let failing = engine_with(two_groups(&[], &[]), Arc::new(FailingText)).await;
    failing.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    assert_eq!(failing.generate_labels().await, vec!["Cluster 1", "Cluster 2"]);

    let absent = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    absent.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    assert_eq!(absent.generate_labels().await, vec!["Cluster 1", "Cluster 2"]);
    let nodes = absent.get_clusters_for_graph().await;
    assert_eq!(nodes[0].label, "Cluster 1");
    assert_eq!(nodes[1].label, "Cluster 2");
}

#[tokio::test]
async fn generated_labels_are_applied_to_graph_nodes() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(FixedText("  \"Tax Paperwork\"\n"))).await;
    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    let labels = engine.generate_labels().await;
    assert_eq!(labels, vec!["Tax Paperwork", "Tax Paperwork"]);
    assert!(engine
        .get_clusters_for_graph()
        .await
        .iter()
        .all(|n| n.label == "Tax Paperwork"));
}

#[tokio::test]
async fn graph_descriptors_skip_stopwords() {
    let engine = engine_with(
        two_groups(&["if", "it", "finance"], &["it", "travel"]),
        Arc::new(NoopProvider),
    )
    .await;
    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();

    let nodes = engine.get_clusters_for_graph().await;
    assert_eq!(nodes.iter().map(|n| n.member_count).sum::<usize>(), 5);
    for node in &nodes {
        for word in ["if", "it"] {
            assert!(!node.top_terms.iter().any(|t| t == word));
            assert!(!node.common_tags.iter().any(|t| t == word));
        }
        assert_eq!(node.member_ids.len(), node.member_count);
    }
    let a = nodes
        .iter()
        .find(|n| n.member_ids.contains(&"a1".to_string()))
        .unwrap();
    assert_eq!(a.common_tags, vec!["finance"]);
    assert_eq!(a.top_terms[0], "finance");
    assert_eq!(a.dominant_folder.as_deref(), Some("/nonexistent"));
    assert_eq!(a.dominant_category.as_deref(), Some("text"));
}

#[tokio::test]
async fn shared_terms_ignore_stopword_only_overlap() {
    let filler = engine_with(
        two_groups(&["it", "finance"], &["it", "travel"]),
        Arc::new(NoopProvider),
    )
    .await;
    filler.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    let edges = filler
        .find_cross_cluster_edges(-1.0, &EdgeOptions::default())
        .await;
    assert_eq!(edges.len(), 1);
    assert!(edges[0].shared_terms.is_empty());

    let related = engine_with(
        two_groups(&["it", "taxes", "finance"], &["it", "taxes", "travel"]),
        Arc::new(NoopProvider),
    )
    .await;
    related.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    let edges = related
        .find_cross_cluster_edges(-1.0, &EdgeOptions::default())
        .await;
    assert_eq!(edges[0].shared_terms, vec!["taxes"]);

    // Orthogonal groups never pass a positive threshold.
    assert!(related
        .find_cross_cluster_edges(0.5, &EdgeOptions::default())
        .await
        .is_empty());
}

fn on_disk(dir: &Path, name: &str) -> FileMetadata {
    let path = dir.join(name);
    std::fs::write(&path, name).unwrap();
    FileMetadata {
        name: Some(name.to_string()),
        path: Some(path.to_string_lossy().into_owned()),
        ..FileMetadata::default()
    }
}

#[tokio::test]
async fn bridge_files_must_still_exist() {
    let dir = tempfile::tempdir().unwrap();
    let bridge_path = dir.path().join("budget_trip.txt");
    std::fs::write(&bridge_path, "budget").unwrap();
    // Only the alternate fields are populated on the bridge file.
    let bridge_meta = FileMetadata {
        file_name: Some("budget_trip.txt".into()),
        file_path: Some(bridge_path.to_string_lossy().into_owned()),
        ..FileMetadata::default()
    };

    let engine = engine_with(
        vec![
            record("a1", vec![1.0, 0.0], on_disk(dir.path(), "a1.txt")),
            record("a2", vec![1.0, 0.1], on_disk(dir.path(), "a2.txt")),
            record("bridge", vec![1.0, 0.5], bridge_meta),
            record("gone", vec![1.0, 0.45], meta("gone.txt", &[])),
            record("b1", vec![0.0, 1.0], on_disk(dir.path(), "b1.txt")),
            record("b2", vec![0.0, 1.1], on_disk(dir.path(), "b2.txt")),
            record("b3", vec![0.0, 0.9], on_disk(dir.path(), "b3.txt")),
        ],
        Arc::new(NoopProvider),
    )
    .await;
    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();

    let options = EdgeOptions {
        include_bridge_files: true,
        min_bridge_similarity: 0.3,
        ..EdgeOptions::default()
    };
    let edges = engine.find_cross_cluster_edges(0.0, &options).await;
    assert_eq!(edges.len(), 1);
    let bridges = &edges[0].bridge_files;
    assert_eq!(bridges.len(), 1);
    assert_eq!(bridges[0].id, "bridge");
    assert_eq!(bridges[0].name, "budget_trip.txt");
    assert_eq!(Path::new(&bridges[0].path), bridge_path.as_path());

    let without = engine
        .find_cross_cluster_edges(0.0, &EdgeOptions::default())
        .await;
    assert!(without[0].bridge_files.is_empty());
}

#[tokio::test]
async fn members_with_missing_files_are_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(
        vec![
            record("a1", vec![1.0, 0.0], on_disk(dir.path(), "a1.txt")),
            record("a2", vec![1.0, 0.1], on_disk(dir.path(), "a2.txt")),
            record("gone", vec![1.0, 0.05], meta("gone.txt", &[])),
            record("b1", vec![0.0, 1.0], on_disk(dir.path(), "b1.txt")),
            record("b2", vec![0.1, 1.0], on_disk(dir.path(), "b2.txt")),
        ],
        Arc::new(NoopProvider),
    )
    .await;
    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    let clusters = engine.clusters().await;
    let a = cluster_of(&clusters, "a1");
    assert_eq!(a.len(), 3);

    std::fs::remove_file(dir.path().join("a2.txt")).unwrap();
    let members = engine.get_cluster_members(a.id).await;
    let ids: Vec<&str> = members.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a1"]);
    assert_eq!(members[0].name, "a1.txt");

    assert!(engine.get_cluster_members(99).await.is_empty());
}

#[tokio::test]
async fn low_duplicate_threshold_is_clamped() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    let report = engine
        .find_near_duplicates(&DuplicateOptions {
            threshold: Some(0.3),
        })
        .await;
    assert!(report.threshold_used >= 0.7);
    assert_eq!(report.files_scanned, 5);
    // a* vectors are near-identical; b* likewise; the groups stay apart.
    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.groups[0].members.len(), 3);
    assert!(!report.truncated);
}

#[tokio::test]
async fn identical_corpus_stays_within_the_pair_limit() {
    let records = (0..200)
        .map(|i| {
            record(
                &format!("f{i}"),
                vec![0.3, 0.4, 0.5],
                meta(&format!("f{i}.txt"), &[]),
            )
        })
        .collect();
    let engine = engine_with(records, Arc::new(NoopProvider)).await;
    let report = engine.find_near_duplicates(&DuplicateOptions::default()).await;
    assert!(report.groups.len() <= 1_000);
    assert!(report.truncated);
    assert!(report.comparisons <= 20_000);
}

#[tokio::test]
async fn cache_is_stale_until_computed_and_after_clear() {
    let engine = engine_with(two_groups(&[], &[]), Arc::new(NoopProvider)).await;
    assert!(engine.is_clusters_stale().await);

    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    assert!(!engine.is_clusters_stale().await);
    assert!(engine.computed_at().await.is_some());

    engine.clear_clusters().await;
    assert!(engine.is_clusters_stale().await);
    assert!(engine.clusters().await.is_empty());
    assert!(engine.get_clusters_for_graph().await.is_empty());
    assert!(engine.computed_at().await.is_none());
}

#[tokio::test]
async fn member_lookup_error_discards_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FlakyLookups::default());
    store
        .upsert(vec![
            record("a1", vec![1.0, 0.0], on_disk(dir.path(), "a1.txt")),
            record("a2", vec![1.0, 0.1], on_disk(dir.path(), "a2.txt")),
            record("a3", vec![1.0, 0.05], on_disk(dir.path(), "a3.txt")),
            record("b1", vec![0.0, 1.0], on_disk(dir.path(), "b1.txt")),
            record("b2", vec![0.1, 1.0], on_disk(dir.path(), "b2.txt")),
        ])
        .await
        .unwrap();
    let engine = ClusteringEngine::new(store.clone(), Arc::new(NoopProvider), seeded());
    engine.compute_clusters(ClusterCount::Fixed(2)).await.unwrap();
    let a_id = cluster_of(&engine.clusters().await, "a1").id;
    assert_eq!(engine.get_cluster_members(a_id).await.len(), 3);

    // Every file is still on disk, so only the store error can empty the list.
    store.break_lookups_of("a2");
    assert!(engine.get_cluster_members(a_id).await.is_empty());
    assert_eq!(engine.clusters().await.len(), 2);
}

#[tokio::test]
async fn failing_store_degrades_to_empty_results() {
    let engine = ClusteringEngine::new(Arc::new(FailingStore), Arc::new(NoopProvider), seeded());
    assert!(engine.get_all_file_embeddings().await.is_empty());
    assert!(matches!(
        engine.compute_clusters(ClusterCount::Auto).await,
        Err(CoreError::InsufficientFiles { found: 0, .. })
    ));
    let report = engine.find_near_duplicates(&DuplicateOptions::default()).await;
    assert!(report.groups.is_empty());
    assert_eq!(report.files_scanned, 0);
    assert!(engine.get_cluster_members(0).await.is_empty());
}
