//! Reconciliation of local cluster ids into one global labelling.
//!
//! Boundary points are copied into every overlapping cell, so one physical
//! cluster can show up as several local clusters in neighbouring partitions.
//! Local clusters that share a point across partitions are joined with a
//! disjoint-set forest, then every point gets exactly one global label.
//!
//! Runs single-threaded after all workers have finished.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{debug, info};

use super::partitioning::CellIndex;
use super::pool::PartitionReport;
use crate::core::loaders::{PointId, PointStore};

/// Identity of a local cluster: the cell that produced it plus its local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterLabel {
    pub cell: CellIndex,
    pub local: usize,
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.cell, self.local)
    }
}

/// Final label of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalLabel {
    Cluster(usize),
    Noise,
}

impl GlobalLabel {
    /// Numeric form used in output files, `-1` for noise.
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            GlobalLabel::Cluster(id) => *id as i64,
            GlobalLabel::Noise => -1,
        }
    }

    #[inline]
    pub fn is_noise(&self) -> bool {
        matches!(self, GlobalLabel::Noise)
    }
}

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    /// Create `size` singleton sets.
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Root of the set containing `x`.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Join the sets containing `x` and `y`. Returns false if they already matched.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return false;
        }

        match self.rank[root_x].cmp(&self.rank[root_y]) {
            std::cmp::Ordering::Less => self.parent[root_x] = root_y,
            std::cmp::Ordering::Greater => self.parent[root_y] = root_x,
            std::cmp::Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
        true
    }
}

/// Counters describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Local clusters across all partitions
    pub local_clusters: usize,
    /// Points found in local clusters of two or more partitions
    pub shared_points: usize,
    /// Unions that actually joined two sets
    pub unions: usize,
}

/// Mapping from every point id to its global label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalClusterAssignment {
    labels: BTreeMap<PointId, GlobalLabel>,
    cluster_count: usize,
    stats: MergeStats,
}

impl GlobalClusterAssignment {
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn label(&self, id: PointId) -> Option<GlobalLabel> {
        self.labels.get(&id).copied()
    }

    /// `(point id, label)` pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (PointId, GlobalLabel)> + '_ {
        self.labels.iter().map(|(&id, &label)| (id, label))
    }

    #[inline]
    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn noise_count(&self) -> usize {
        self.labels.values().filter(|l| l.is_noise()).count()
    }

    #[inline]
    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Member ids of each global cluster, keyed by cluster id.
    pub fn clusters(&self) -> BTreeMap<usize, Vec<PointId>> {
        let mut clusters: BTreeMap<usize, Vec<PointId>> = BTreeMap::new();
        for (&id, label) in &self.labels {
            if let GlobalLabel::Cluster(c) = label {
                clusters.entry(*c).or_default().push(id);
            }
        }
        clusters
    }
}

/// Size and centroid of one global cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSummary {
    pub label: usize,
    pub points: usize,
    pub avg_lat: f64,
    pub avg_long: f64,
}

impl GlobalClusterAssignment {
    /// Per-cluster centroids, largest cluster first (ties by label).
    pub fn summaries(&self, store: &PointStore) -> Vec<ClusterSummary> {
        let mut sums: BTreeMap<usize, (usize, f64, f64)> = BTreeMap::new();
        for point in store.points() {
            if let Some(GlobalLabel::Cluster(c)) = self.label(point.id) {
                let entry = sums.entry(c).or_insert((0, 0.0, 0.0));
                entry.0 += 1;
                entry.1 += point.lat;
                entry.2 += point.long;
            }
        }

        let mut summaries: Vec<ClusterSummary> = sums
            .into_iter()
            .map(|(label, (n, lat, long))| ClusterSummary {
                label,
                points: n,
                avg_lat: lat / n as f64,
                avg_long: long / n as f64,
            })
            .collect();
        summaries.sort_by(|a, b| b.points.cmp(&a.points).then(a.label.cmp(&b.label)));
        summaries
    }
}

/// Merge per-partition results into a global assignment.
///
/// Every point of `store` appears exactly once in the result. A point in local
/// clusters of two or more partitions joins all of those clusters. A point held
/// by several local clusters of one partition only takes the label of the first
/// of them, in `(cell, local id)` order. Global ids are numbered from 0 in
/// ascending order of each cluster's smallest point id, so merging the same
/// reports always yields the same assignment regardless of report order.
pub fn merge_partitions(store: &PointStore, reports: &[PartitionReport]) -> GlobalClusterAssignment {
    let mut ordered: Vec<&PartitionReport> = reports.iter().collect();
    ordered.sort_by_key(|r| r.cell);

    // One entry per local cluster, in (cell, local id) order
    let mut entries: Vec<ClusterLabel> = Vec::new();
    let mut memberships: BTreeMap<PointId, Vec<usize>> = BTreeMap::new();

    for report in &ordered {
        let mut local: Vec<_> = report.clusters.iter().collect();
        local.sort_by_key(|c| c.id);

        for cluster in local {
            let entry = entries.len();
            entries.push(ClusterLabel {
                cell: report.cell,
                local: cluster.id,
            });
            for &id in &cluster.members {
                memberships.entry(id).or_default().push(entry);
            }
        }
    }

    let mut sets = DisjointSet::new(entries.len());
    let mut stats = MergeStats {
        local_clusters: entries.len(),
        ..MergeStats::default()
    };

    for (id, owners) in &memberships {
        let first = owners[0];
        let spans_cells = owners[1..]
            .iter()
            .any(|&e| entries[e].cell != entries[first].cell);
        if !spans_cells {
            continue;
        }

        stats.shared_points += 1;
        for &other in &owners[1..] {
            if sets.union(first, other) {
                stats.unions += 1;
                debug!("Point {} joins {} and {}", id, entries[first], entries[other]);
            }
        }
    }

    // Number roots in ascending point-id order
    let mut global_of_root: HashMap<usize, usize> = HashMap::new();
    let mut labels: BTreeMap<PointId, GlobalLabel> = BTreeMap::new();

    for (&id, owners) in &memberships {
        let root = sets.find(owners[0]);
        let next = global_of_root.len();
        let global = *global_of_root.entry(root).or_insert(next);
        labels.insert(id, GlobalLabel::Cluster(global));
    }

    for point in store.points() {
        labels.entry(point.id).or_insert(GlobalLabel::Noise);
    }

    let cluster_count = global_of_root.len();
    info!(
        "Merged {} local clusters into {} global clusters ({} shared points, {} unions)",
        stats.local_clusters, cluster_count, stats.shared_points, stats.unions
    );

    GlobalClusterAssignment {
        labels,
        cluster_count,
        stats,
    }
}
