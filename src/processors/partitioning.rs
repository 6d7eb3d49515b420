//! Spatial partitioning of a point set into an N×N grid of overlapping cells.
//!
//! Cell `(i, j)` covers longitudes `[min_long + i·inc_x − ε, min_long + (i+1)·inc_x + ε)`
//! and latitudes `[min_lat + j·inc_y − ε, min_lat + (j+1)·inc_y + ε)`. A point is
//! appended to every cell whose expanded rectangle contains it, so any two points
//! within ε of each other share at least one cell.

use std::fmt;

use log::{debug, info, warn};

use crate::config::PartitionStrategy;
use crate::core::loaders::{BoundingEnvelope, Point, PointStore};

/// Position of a cell in the grid. `i` runs along longitude, `j` along latitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellIndex {
    pub i: usize,
    pub j: usize,
}

impl CellIndex {
    #[inline]
    pub fn new(i: usize, j: usize) -> Self {
        Self { i, j }
    }

    /// Legacy numeric cell label used in partition report lines.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.i as u64 * 10_000_000 + self.j as u64 * 1_000_000
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.i, self.j)
    }
}

/// One grid cell and the points that fall inside its expanded bounds.
///
/// A partition is the unit of work handed to a single worker; the cell identity
/// and its points always travel together.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    pub cell: CellIndex,
    pub points: Vec<&'a Point>,
}

impl<'a> Partition<'a> {
    fn empty(cell: CellIndex) -> Self {
        Self {
            cell,
            points: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Cell sizes and margin derived from an envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub envelope: BoundingEnvelope,
    pub resolution: usize,
    pub epsilon: f64,
    /// Cell width along longitude
    pub inc_x: f64,
    /// Cell height along latitude
    pub inc_y: f64,
}

impl GridGeometry {
    pub fn new(envelope: BoundingEnvelope, resolution: usize, epsilon: f64) -> Self {
        let n = resolution.max(1) as f64;
        Self {
            envelope,
            resolution: resolution.max(1),
            epsilon,
            inc_x: (envelope.northeast.long - envelope.southwest.long) / n,
            inc_y: (envelope.northeast.lat - envelope.southwest.lat) / n,
        }
    }

    /// Expanded-rectangle inclusion test for one cell.
    #[inline]
    pub fn cell_contains(&self, cell: CellIndex, point: &Point) -> bool {
        let min_long = self.envelope.southwest.long;
        let min_lat = self.envelope.southwest.lat;
        let eps = self.epsilon;
        let (i, j) = (cell.i as f64, cell.j as f64);

        point.long >= min_long + i * self.inc_x - eps
            && point.long < min_long + (i + 1.0) * self.inc_x + eps
            && point.lat >= min_lat + j * self.inc_y - eps
            && point.lat < min_lat + (j + 1.0) * self.inc_y + eps
    }

    /// Inclusive index span of cells along one axis that could contain `value`.
    ///
    /// One cell of slack on each side absorbs rounding; the exact test in
    /// `cell_contains` decides membership.
    fn candidate_span(&self, value: f64, origin: f64, inc: f64) -> Option<(usize, usize)> {
        let last = self.resolution - 1;
        if inc.is_nan() || inc <= 0.0 {
            return Some((0, last));
        }

        let lo = ((value - origin - self.epsilon) / inc).floor() - 1.0;
        let hi = ((value - origin + self.epsilon) / inc).floor() + 1.0;
        if hi < 0.0 || lo > last as f64 {
            return None;
        }

        Some((lo.max(0.0) as usize, hi.min(last as f64) as usize))
    }
}

/// N×N grid of partitions stored flat, cell `(i, j)` at index `i·N + j`.
#[derive(Debug, Clone)]
pub struct Grid<'a> {
    geometry: GridGeometry,
    cells: Vec<Partition<'a>>,
    /// Points that no expanded cell contains
    outside: usize,
}

impl<'a> Grid<'a> {
    fn new(geometry: GridGeometry) -> Self {
        let n = geometry.resolution;
        let mut cells = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                cells.push(Partition::empty(CellIndex::new(i, j)));
            }
        }
        Self {
            geometry,
            cells,
            outside: 0,
        }
    }

    #[inline]
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    #[inline]
    pub fn resolution(&self) -> usize {
        self.geometry.resolution
    }

    #[inline]
    pub fn cells(&self) -> &[Partition<'a>] {
        &self.cells
    }

    /// O(1) lookup of a cell by index.
    #[inline]
    pub fn cell(&self, index: CellIndex) -> Option<&Partition<'a>> {
        let n = self.resolution();
        if index.i >= n || index.j >= n {
            return None;
        }
        self.cells.get(index.i * n + index.j)
    }

    #[inline]
    fn slot(&self, index: CellIndex) -> usize {
        index.i * self.resolution() + index.j
    }

    /// Points that fell outside every cell.
    #[inline]
    pub fn outside_points(&self) -> usize {
        self.outside
    }

    /// Total cell memberships; exceeds the point count when cells overlap.
    pub fn total_memberships(&self) -> usize {
        self.cells.iter().map(|c| c.len()).sum()
    }

    pub fn non_empty_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }
}

/// Assign every point of `store` to every cell whose expanded bounds contain it.
///
/// Runs on the calling thread; the returned grid is read-only from here on.
pub fn partition_points<'a>(
    store: &'a PointStore,
    envelope: &BoundingEnvelope,
    resolution: usize,
    epsilon: f64,
    strategy: PartitionStrategy,
) -> Grid<'a> {
    let geometry = GridGeometry::new(*envelope, resolution, epsilon);
    let mut grid = Grid::new(geometry);

    info!(
        "Partitioning {} points into {}x{} cells (inc_x={:.6}, inc_y={:.6}, eps={})",
        store.len(),
        geometry.resolution,
        geometry.resolution,
        geometry.inc_x,
        geometry.inc_y,
        epsilon
    );

    let mut placed = vec![false; store.len()];

    match strategy {
        PartitionStrategy::Exhaustive => {
            for slot in 0..grid.cells.len() {
                let cell = grid.cells[slot].cell;
                for (k, point) in store.points().iter().enumerate() {
                    if geometry.cell_contains(cell, point) {
                        grid.cells[slot].points.push(point);
                        placed[k] = true;
                    }
                }
            }
        }
        PartitionStrategy::Halo => {
            let sw = envelope.southwest;
            for (k, point) in store.points().iter().enumerate() {
                let span_i = geometry.candidate_span(point.long, sw.long, geometry.inc_x);
                let span_j = geometry.candidate_span(point.lat, sw.lat, geometry.inc_y);
                let (Some((i_lo, i_hi)), Some((j_lo, j_hi))) = (span_i, span_j) else {
                    continue;
                };

                for i in i_lo..=i_hi {
                    for j in j_lo..=j_hi {
                        let cell = CellIndex::new(i, j);
                        if geometry.cell_contains(cell, point) {
                            let slot = grid.slot(cell);
                            grid.cells[slot].points.push(point);
                            placed[k] = true;
                        }
                    }
                }
            }
        }
    }

    grid.outside = placed.iter().filter(|&&p| !p).count();
    if grid.outside > 0 {
        warn!(
            "{} points lie outside the grid envelope and will be reported as noise",
            grid.outside
        );
    }
    debug!(
        "Partitioning done: {} memberships across {} non-empty cells",
        grid.total_memberships(),
        grid.non_empty_cells()
    );

    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::Coord;

    fn unit_envelope() -> BoundingEnvelope {
        BoundingEnvelope::new(Coord::new(0.0, 0.0), Coord::new(2.0, 2.0))
    }

    fn cells_of(grid: &Grid, id: u64) -> Vec<CellIndex> {
        grid.cells()
            .iter()
            .filter(|c| c.points.iter().any(|p| p.id == id))
            .map(|c| c.cell)
            .collect()
    }

    /// Deterministic pseudo-random coordinates in [0, 2).
    fn scattered_store(n: usize) -> PointStore {
        let mut state: u64 = 12345;
        let mut next = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 11) as f64 / (1u64 << 53) as f64 * 2.0
        };
        let coords: Vec<(f64, f64)> = (0..n).map(|_| (next(), next())).collect();
        PointStore::from_coords(&coords)
    }

    #[test]
    fn test_cell_offset() {
        assert_eq!(CellIndex::new(0, 0).offset(), 0);
        assert_eq!(CellIndex::new(3, 2).offset(), 32_000_000);
        assert_eq!(CellIndex::new(1, 4).to_string(), "(1,4)");
    }

    #[test]
    fn test_grid_has_n_squared_cells() {
        let store = PointStore::from_coords(&[(0.5, 0.5)]);
        let grid = partition_points(&store, &unit_envelope(), 3, 0.1, PartitionStrategy::Exhaustive);

        assert_eq!(grid.cells().len(), 9);
        assert_eq!(grid.cell(CellIndex::new(2, 1)).unwrap().cell, CellIndex::new(2, 1));
        assert!(grid.cell(CellIndex::new(3, 0)).is_none());
    }

    #[test]
    fn test_every_point_assigned() {
        let store = scattered_store(500);
        let envelope = store.envelope().unwrap();

        for n in [1, 2, 5, 8] {
            let grid = partition_points(&store, &envelope, n, 0.01, PartitionStrategy::Exhaustive);
            assert_eq!(grid.outside_points(), 0);
            for p in store.points() {
                assert!(!cells_of(&grid, p.id).is_empty(), "point {} dropped", p.id);
            }
        }
    }

    #[test]
    fn test_interior_point_single_cell() {
        // long 0.5, lat 0.5 is well inside cell (0,0)
        let store = PointStore::from_coords(&[(0.5, 0.5)]);
        let grid = partition_points(&store, &unit_envelope(), 2, 0.1, PartitionStrategy::Exhaustive);

        assert_eq!(cells_of(&grid, 1), vec![CellIndex::new(0, 0)]);
    }

    #[test]
    fn test_edge_point_in_adjacent_cells() {
        // long 0.95 is within eps of the i=0/i=1 boundary at 1.0
        let store = PointStore::from_coords(&[(0.5, 0.95)]);
        let grid = partition_points(&store, &unit_envelope(), 2, 0.1, PartitionStrategy::Exhaustive);

        assert_eq!(
            cells_of(&grid, 1),
            vec![CellIndex::new(0, 0), CellIndex::new(1, 0)]
        );
    }

    #[test]
    fn test_corner_point_in_four_cells() {
        let store = PointStore::from_coords(&[(1.0, 1.0)]);
        let grid = partition_points(&store, &unit_envelope(), 2, 0.1, PartitionStrategy::Exhaustive);

        assert_eq!(cells_of(&grid, 1).len(), 4);
        assert_eq!(grid.total_memberships(), 4);
    }

    #[test]
    fn test_fixed_envelope_leaves_outside_points() {
        let store = PointStore::from_coords(&[(0.5, 0.5), (5.0, 5.0)]);
        let grid = partition_points(&store, &unit_envelope(), 2, 0.1, PartitionStrategy::Exhaustive);

        assert_eq!(grid.outside_points(), 1);
        assert!(cells_of(&grid, 2).is_empty());
    }

    #[test]
    fn test_halo_matches_exhaustive() {
        let store = scattered_store(400);
        let envelope = store.envelope().unwrap();

        for (n, eps) in [(1, 0.05), (4, 0.05), (7, 0.2), (10, 0.001)] {
            let a = partition_points(&store, &envelope, n, eps, PartitionStrategy::Exhaustive);
            let b = partition_points(&store, &envelope, n, eps, PartitionStrategy::Halo);

            for (ca, cb) in a.cells().iter().zip(b.cells()) {
                assert_eq!(ca.cell, cb.cell);
                let ids_a: Vec<u64> = ca.points.iter().map(|p| p.id).collect();
                let ids_b: Vec<u64> = cb.points.iter().map(|p| p.id).collect();
                assert_eq!(ids_a, ids_b, "cell {} differs for n={}", ca.cell, n);
            }
            assert_eq!(a.outside_points(), b.outside_points());
        }
    }

    #[test]
    fn test_halo_outside_points() {
        // (0.25, 0.25) sits well inside cell (0,0); the second point is far outside
        let store = PointStore::from_coords(&[(0.25, 0.25), (-3.0, 9.0)]);
        let grid = partition_points(&store, &unit_envelope(), 4, 0.1, PartitionStrategy::Halo);

        assert_eq!(grid.outside_points(), 1);
        assert_eq!(grid.total_memberships(), 1);
    }

    #[test]
    fn test_degenerate_envelope() {
        // All points share one latitude, so inc_y is zero
        let store = PointStore::from_coords(&[(1.0, 0.0), (1.0, 1.0), (1.0, 2.0)]);
        let envelope = store.envelope().unwrap();

        let a = partition_points(&store, &envelope, 3, 0.1, PartitionStrategy::Exhaustive);
        let b = partition_points(&store, &envelope, 3, 0.1, PartitionStrategy::Halo);

        assert_eq!(a.outside_points(), 0);
        assert_eq!(a.total_memberships(), b.total_memberships());
    }
}
