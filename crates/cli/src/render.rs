//! Plain-text output for terminal use.

use clustering_core::clustering::{
    ClusterEdge, ClusterNode, ClusterRunSummary, DuplicateReport, MemberFile,
};
use std::fmt::Write;

pub fn summary(s: &ClusterRunSummary) -> String {
    let mut out = format!(
        "k={} files={} iterations={} converged={} inertia={:.4}\n",
        s.k, s.files, s.iterations, s.converged, s.inertia
    );
    if s.skipped > 0 {
        let _ = writeln!(out, "skipped {} files with mismatched dimensions", s.skipped);
    }
    out
}

pub fn clusters(nodes: &[ClusterNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        let _ = writeln!(
            out,
            "[{}] {} ({} files, cohesion {:.3})",
            n.id, n.label, n.member_count, n.cohesion
        );
        if !n.top_terms.is_empty() {
            let _ = writeln!(out, "    terms: {}", n.top_terms.join(", "));
        }
        if !n.common_tags.is_empty() {
            let _ = writeln!(out, "    tags: {}", n.common_tags.join(", "));
        }
        if let Some(folder) = &n.dominant_folder {
            let _ = writeln!(out, "    folder: {folder}");
        }
        if let Some(category) = &n.dominant_category {
            let _ = writeln!(out, "    category: {category}");
        }
    }
    out
}

pub fn edges(edges: &[ClusterEdge]) -> String {
    let mut out = String::new();
    for e in edges {
        let _ = write!(out, "{} -- {} ({:.3})", e.source, e.target, e.similarity);
        if !e.shared_terms.is_empty() {
            let _ = write!(out, " shared: {}", e.shared_terms.join(", "));
        }
        out.push('\n');
        for b in &e.bridge_files {
            let _ = writeln!(
                out,
                "    bridge from {}: {} ({:.3})",
                b.cluster_id, b.path, b.similarity
            );
        }
    }
    out
}

pub fn members(members: &[MemberFile]) -> String {
    members.iter().map(|m| format!("{}\t{}\n", m.id, m.path)).collect()
}

pub fn duplicates(report: &DuplicateReport) -> String {
    let mut out = format!(
        "{} groups among {} files (threshold {:.2}, {} comparisons{})\n",
        report.groups.len(),
        report.files_scanned,
        report.threshold_used,
        report.comparisons,
        if report.truncated { ", truncated" } else { "" }
    );
    for (i, g) in report.groups.iter().enumerate() {
        let _ = writeln!(
            out,
            "group {} (max {:.3}, avg {:.3})",
            i + 1,
            g.max_similarity,
            g.average_similarity
        );
        for m in &g.members {
            let shown = m.path.as_deref().or(m.name.as_deref()).unwrap_or(&m.id);
            let _ = writeln!(out, "    {shown}");
        }
    }
    out
}
