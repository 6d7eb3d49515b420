//! DBSCAN clustering of a single partition.
//!
//! This module implements the per-cell clustering step using:
//! - `kiddo` KD-tree for candidate neighbour queries
//! - an exact planar Euclidean filter (`dist <= epsilon`) on those candidates
//! - a `visited` mask so each point seeds or expands at most once
//!
//! # Example
//!
//! ```
//! use grid_dbscan::core::loaders::Point;
//! use grid_dbscan::processors::dbscan::{ClusterEngine, Dbscan, DbscanParams};
//!
//! let points = vec![
//!     Point::new(1, 0.0, 0.0),
//!     Point::new(2, 0.0, 0.1),
//!     Point::new(3, 0.1, 0.0),
//! ];
//! let refs: Vec<&Point> = points.iter().collect();
//! let clusters = Dbscan::new(DbscanParams::new(1, 0.5)).cluster(&refs);
//! assert_eq!(clusters.len(), 1);
//! ```

use std::collections::{HashMap, HashSet};

use kiddo::{ImmutableKdTree, SquaredEuclidean};

use crate::config::{ClusteringConfig, Expansion};
use crate::core::loaders::{Point, PointId};

/// Relative slack applied to the KD-tree search radius so rounding in the
/// squared distance never drops a point the exact test would accept.
const SEARCH_SLACK: f64 = 1e-6;

/// A cluster found inside one partition. `id` is only meaningful within that partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCluster {
    /// Sequential id, starting at 0 per partition
    pub id: usize,
    /// Member point ids, sorted and deduplicated
    pub members: Vec<PointId>,
}

impl LocalCluster {
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// DBSCAN parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbscanParams {
    /// A point is core when it has strictly more neighbours than this
    pub min_density: usize,
    /// Neighbourhood radius
    pub epsilon: f64,
    pub expansion: Expansion,
}

impl DbscanParams {
    pub fn new(min_density: usize, epsilon: f64) -> Self {
        Self {
            min_density,
            epsilon,
            expansion: Expansion::SingleLevel,
        }
    }

    pub fn with_expansion(mut self, expansion: Expansion) -> Self {
        self.expansion = expansion;
        self
    }
}

impl From<&ClusteringConfig> for DbscanParams {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            min_density: config.min_density,
            epsilon: config.epsilon,
            expansion: config.expansion,
        }
    }
}

/// Anything that can turn one partition's points into local clusters.
///
/// Engines are shared by every worker of the pool, hence `Sync`.
pub trait ClusterEngine: Sync {
    fn cluster(&self, points: &[&Point]) -> Vec<LocalCluster>;
}

/// Neighbour lookup over one partition.
///
/// The KD-tree holds each distinct coordinate once; `sites[k]` lists the
/// partition indices located at tree item `k`.
struct NeighbourIndex<'p> {
    points: &'p [&'p Point],
    tree: ImmutableKdTree<f64, 2>,
    sites: Vec<Vec<usize>>,
    epsilon: f64,
    search_radius_sq: f64,
}

impl<'p> NeighbourIndex<'p> {
    fn new(points: &'p [&'p Point], epsilon: f64) -> Self {
        let mut site_of: HashMap<(u64, u64), usize> = HashMap::with_capacity(points.len());
        let mut coords: Vec<[f64; 2]> = Vec::with_capacity(points.len());
        let mut sites: Vec<Vec<usize>> = Vec::with_capacity(points.len());

        for (idx, p) in points.iter().enumerate() {
            let key = (p.long.to_bits(), p.lat.to_bits());
            let site = *site_of.entry(key).or_insert_with(|| {
                coords.push([p.long, p.lat]);
                sites.push(Vec::new());
                sites.len() - 1
            });
            sites[site].push(idx);
        }

        let tree: ImmutableKdTree<f64, 2> = ImmutableKdTree::new_from_slice(&coords);

        Self {
            points,
            tree,
            sites,
            epsilon,
            search_radius_sq: epsilon * epsilon * (1.0 + SEARCH_SLACK),
        }
    }

    /// Indices of every other point within `epsilon` of point `idx`.
    fn neighbours(&self, idx: usize) -> Vec<usize> {
        let p = self.points[idx];
        let mut found: Vec<usize> = self
            .tree
            .within::<SquaredEuclidean>(&[p.long, p.lat], self.search_radius_sq)
            .iter()
            .flat_map(|nn| self.sites[nn.item as usize].iter().copied())
            .filter(|&j| j != idx && p.distance(self.points[j]) <= self.epsilon)
            .collect();
        // KD-tree results come back by distance; sort so expansion order only
        // depends on input order.
        found.sort_unstable();
        found
    }
}

/// DBSCAN over a single partition.
///
/// # Algorithm
///
/// 1. Visit points in list order, skipping any already visited
/// 2. Compute the neighbours of the point; if there are more than
///    `min_density`, the point seeds a cluster holding itself and its neighbours
/// 3. **Expansion**: every unvisited seed neighbour is visited and, if it is
///    itself core, its neighbours are merged into the cluster. With
///    `Expansion::SingleLevel` points merged in this step are not expanded
///    again; `Expansion::Transitive` keeps going until the cluster stops growing
/// 4. Points never merged into a cluster are noise and are not reported
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    params: DbscanParams,
}

impl Dbscan {
    pub fn new(params: DbscanParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &DbscanParams {
        &self.params
    }

    #[inline]
    fn is_core(&self, neighbours: &[usize]) -> bool {
        neighbours.len() > self.params.min_density
    }
}

impl ClusterEngine for Dbscan {
    fn cluster(&self, points: &[&Point]) -> Vec<LocalCluster> {
        let n = points.len();
        if n == 0 {
            return Vec::new();
        }

        let index = NeighbourIndex::new(points, self.params.epsilon);
        let mut visited = vec![false; n];
        let mut clusters = Vec::new();

        for seed in 0..n {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;

            let seed_neighbours = index.neighbours(seed);
            if !self.is_core(&seed_neighbours) {
                continue;
            }

            let mut members: Vec<usize> = Vec::with_capacity(seed_neighbours.len() + 1);
            let mut in_cluster: HashSet<usize> = HashSet::with_capacity(seed_neighbours.len() + 1);
            members.push(seed);
            in_cluster.insert(seed);
            for &q in &seed_neighbours {
                if in_cluster.insert(q) {
                    members.push(q);
                }
            }

            // Single-level expansion stops after the seed's own neighbours.
            let seed_frontier = members.len();
            let mut cursor = 1;
            loop {
                let limit = match self.params.expansion {
                    Expansion::SingleLevel => seed_frontier,
                    Expansion::Transitive => members.len(),
                };
                if cursor >= limit {
                    break;
                }

                let q = members[cursor];
                cursor += 1;
                if visited[q] {
                    continue;
                }
                visited[q] = true;

                let q_neighbours = index.neighbours(q);
                if self.is_core(&q_neighbours) {
                    for r in q_neighbours {
                        if in_cluster.insert(r) {
                            members.push(r);
                        }
                    }
                }
            }

            let mut ids: Vec<PointId> = members.iter().map(|&m| points[m].id).collect();
            ids.sort_unstable();

            clusters.push(LocalCluster {
                id: clusters.len(),
                members: ids,
            });
        }

        clusters
    }
}
