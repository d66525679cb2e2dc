//! Pairwise near-duplicate grouping with hard safety limits.

use super::cosine_similarity;

/// Requested thresholds below this are raised to it.
pub const MIN_SAFE_THRESHOLD: f32 = 0.7;
/// Pairwise comparisons considered per scan.
pub const MAX_PAIR_COMPARISONS: usize = 20_000;
/// Matching pairs retained per scan.
pub const MAX_DUPLICATE_PAIRS: usize = 1_000;

pub fn effective_threshold(requested: f32) -> f32 {
    if requested.is_nan() {
        MIN_SAFE_THRESHOLD
    } else {
        requested.clamp(MIN_SAFE_THRESHOLD, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexGroup {
    /// Point indices, ascending.
    pub members: Vec<usize>,
    pub max_similarity: f32,
    pub average_similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateScan {
    pub groups: Vec<IndexGroup>,
    pub comparisons: usize,
    /// A safety limit stopped the scan early.
    pub truncated: bool,
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index becomes the root so groups order by first member.
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Groups points whose cosine similarity is at least `threshold`, merging transitively.
///
/// `threshold` should already have gone through [`effective_threshold`].
pub fn group_near_duplicates<P: AsRef<[f32]>>(points: &[P], threshold: f32) -> DuplicateScan {
    let n = points.len();
    let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
    let mut comparisons = 0usize;
    let mut truncated = false;

    'scan: for i in 0..n {
        for j in (i + 1)..n {
            if comparisons >= MAX_PAIR_COMPARISONS || pairs.len() >= MAX_DUPLICATE_PAIRS {
                truncated = true;
                break 'scan;
            }
            comparisons += 1;
            let sim = cosine_similarity(points[i].as_ref(), points[j].as_ref());
            if sim >= threshold {
                pairs.push((i, j, sim));
            }
        }
    }

    let mut sets = DisjointSet::new(n);
    for &(i, j, _) in &pairs {
        sets.union(i, j);
    }

    // root -> (members, sum, count, max)
    let mut by_root: std::collections::BTreeMap<usize, (Vec<usize>, f32, usize, f32)> =
        std::collections::BTreeMap::new();
    for &(i, j, sim) in &pairs {
        let root = sets.find(i);
        let entry = by_root
            .entry(root)
            .or_insert_with(|| (Vec::new(), 0.0, 0, f32::MIN));
        entry.0.push(i);
        entry.0.push(j);
        entry.1 += sim;
        entry.2 += 1;
        entry.3 = entry.3.max(sim);
    }

    let groups = by_root
        .into_values()
        .map(|(mut members, sum, count, max)| {
            members.sort_unstable();
            members.dedup();
            IndexGroup {
                members,
                max_similarity: max,
                average_similarity: sum / count as f32,
            }
        })
        .collect();

    DuplicateScan {
        groups,
        comparisons,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_thresholds_are_raised_to_the_floor() {
        assert_eq!(effective_threshold(0.3), MIN_SAFE_THRESHOLD);
        assert_eq!(effective_threshold(f32::NAN), MIN_SAFE_THRESHOLD);
        assert_eq!(effective_threshold(0.95), 0.95);
        assert_eq!(effective_threshold(3.0), 1.0);
    }

    #[test]
    fn groups_merge_transitively() {
        let points = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.14, 0.0],
            vec![0.96, 0.28, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let scan = group_near_duplicates(&points, 0.98);
        assert_eq!(scan.groups.len(), 1);
        assert_eq!(scan.groups[0].members, vec![0, 1, 2]);
        assert_eq!(scan.comparisons, 6);
        assert!(!scan.truncated);
    }

    #[test]
    fn identical_corpus_stops_at_the_pair_limit() {
        let points = vec![vec![0.5f32, 0.5]; 200];
        let scan = group_near_duplicates(&points, MIN_SAFE_THRESHOLD);
        assert!(scan.truncated);
        assert!(scan.groups.len() <= MAX_DUPLICATE_PAIRS);
        assert!(scan.comparisons <= MAX_PAIR_COMPARISONS);
        assert_eq!(scan.groups.len(), 1);
    }
}
