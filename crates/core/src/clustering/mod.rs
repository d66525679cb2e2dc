//! Semantic clustering of file embeddings.

pub mod duplicates;
pub mod engine;
pub mod kmeans;
pub mod terms;

pub use engine::{
    BridgeFile, ClusterEdge, ClusterNode, ClusterRunSummary, ClusteringEngine, DuplicateGroup,
    DuplicateMember, DuplicateOptions, DuplicateReport, EdgeOptions, MemberFile,
};
pub use kmeans::ClusterCount;

use crate::models::FileMetadata;
use serde::Serialize;
use std::sync::Arc;

/// Minimum corpus size for a clustering run.
pub const MIN_FILES_FOR_CLUSTERING: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub id: String,
    pub metadata: FileMetadata,
    #[serde(skip)]
    pub embedding: Arc<[f32]>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: usize,
    pub label: String,
    pub members: Vec<ClusterMember>,
    #[serde(skip)]
    pub centroid: Vec<f32>,
    pub top_terms: Vec<String>,
    pub common_tags: Vec<String>,
    pub dominant_folder: Option<String>,
    pub dominant_category: Option<String>,
    /// Mean cosine similarity of members to the centroid.
    pub cohesion: f32,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub fn fallback_label(index: usize) -> String {
    format!("Cluster {}", index + 1)
}

pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
