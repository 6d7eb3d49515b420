//! Bounded worker pool that clusters every grid cell independently.
//!
//! Each partition is handed to exactly one worker as a single value carrying
//! both its cell index and its points, so a result can never be labelled with
//! another cell's identity. Workers share nothing mutable: each reads its own
//! partition and returns its own report.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error};
use rayon::prelude::*;

use super::dbscan::{ClusterEngine, LocalCluster};
use super::partitioning::{CellIndex, Grid, Partition};

/// Cooperative cancellation flag shared between the caller and the workers.
///
/// Workers check it before starting each partition; a partition that has
/// already started always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a partition's clustering ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStatus {
    Clustered,
    /// The engine panicked; the partition contributes no clusters
    Failed(String),
    /// Skipped because cancellation was requested first
    Cancelled,
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStatus::Clustered => write!(f, "clustered"),
            PartitionStatus::Failed(_) => write!(f, "failed"),
            PartitionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of processing one partition.
#[derive(Debug, Clone)]
pub struct PartitionReport {
    pub cell: CellIndex,
    pub clusters: Vec<LocalCluster>,
    pub point_count: usize,
    pub status: PartitionStatus,
}

impl PartitionReport {
    #[inline]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// One-line summary: `Partition <offset> (i,j) : [clusters,points]`.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "Partition {:>10} {:<7} : [{:4},{:6}]",
            self.cell.offset(),
            self.cell.to_string(),
            self.cluster_count(),
            self.point_count
        );
        if let PartitionStatus::Failed(msg) = &self.status {
            line.push_str(&format!(" FAILED: {}", msg));
        }
        line
    }
}

/// Fixed-size pool of clustering workers.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Build a pool with exactly `workers` threads.
    pub fn new(workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dbscan-worker-{}", i))
            .build()?;
        Ok(Self { pool, workers })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Cluster every partition of `grid`, blocking until all have finished.
    ///
    /// Returns one report per cell, in grid order. `observer` is called from
    /// the worker thread as soon as each partition finishes.
    pub fn run<E, F>(
        &self,
        grid: &Grid<'_>,
        engine: &E,
        cancel: &CancellationToken,
        observer: &F,
    ) -> Vec<PartitionReport>
    where
        E: ClusterEngine + ?Sized,
        F: Fn(&PartitionReport) + Sync + ?Sized,
    {
        self.pool.install(|| {
            grid.cells()
                .par_iter()
                .map(|partition| {
                    let report = process_partition(partition, engine, cancel);
                    observer(&report);
                    report
                })
                .collect()
        })
    }
}

/// Cluster one partition, converting an engine panic into a failed report.
fn process_partition<E>(
    partition: &Partition<'_>,
    engine: &E,
    cancel: &CancellationToken,
) -> PartitionReport
where
    E: ClusterEngine + ?Sized,
{
    let cell = partition.cell;
    let point_count = partition.len();

    if cancel.is_cancelled() {
        return PartitionReport {
            cell,
            clusters: Vec::new(),
            point_count,
            status: PartitionStatus::Cancelled,
        };
    }

    if partition.is_empty() {
        return PartitionReport {
            cell,
            clusters: Vec::new(),
            point_count,
            status: PartitionStatus::Clustered,
        };
    }

    match panic::catch_unwind(AssertUnwindSafe(|| engine.cluster(&partition.points))) {
        Ok(clusters) => {
            debug!(
                "Partition {} done: {} clusters over {} points",
                cell,
                clusters.len(),
                point_count
            );
            PartitionReport {
                cell,
                clusters,
                point_count,
                status: PartitionStatus::Clustered,
            }
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!("Partition {} failed: {}", cell, msg);
            PartitionReport {
                cell,
                clusters: Vec::new(),
                point_count,
                status: PartitionStatus::Failed(msg),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionStrategy;
    use crate::core::loaders::{BoundingEnvelope, Coord, Point, PointStore};
    use crate::processors::dbscan::{Dbscan, DbscanParams};
    use crate::processors::partitioning::partition_points;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn envelope() -> BoundingEnvelope {
        BoundingEnvelope::new(Coord::new(0.0, 0.0), Coord::new(3.0, 3.0))
    }

    /// One tight 4-point blob in the middle of each of the 9 cells.
    fn blob_store() -> PointStore {
        let mut coords = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                let (lat, long) = (j as f64 + 0.5, i as f64 + 0.5);
                coords.push((lat, long));
                coords.push((lat + 0.01, long));
                coords.push((lat, long + 0.01));
                coords.push((lat + 0.01, long + 0.01));
            }
        }
        PointStore::from_coords(&coords)
    }

    /// Engine that panics on the partition containing point 1.
    struct FaultyEngine(Dbscan);

    impl ClusterEngine for FaultyEngine {
        fn cluster(&self, points: &[&Point]) -> Vec<LocalCluster> {
            if points.iter().any(|p| p.id == 1) {
                panic!("corrupt partition");
            }
            self.0.cluster(points)
        }
    }

    #[test]
    fn test_one_report_per_cell() {
        let store = blob_store();
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        let pool = WorkerPool::new(4).unwrap();
        let engine = Dbscan::new(DbscanParams::new(2, 0.05));

        let seen = AtomicUsize::new(0);
        let reports = pool.run(&grid, &engine, &CancellationToken::new(), &|_: &PartitionReport| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(reports.len(), 9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
        let cells: HashSet<CellIndex> = reports.iter().map(|r| r.cell).collect();
        assert_eq!(cells.len(), 9);
    }

    #[test]
    fn test_report_matches_its_cell() {
        let store = blob_store();
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        let pool = WorkerPool::new(3).unwrap();
        let engine = Dbscan::new(DbscanParams::new(2, 0.05));

        let reports = pool.run(&grid, &engine, &CancellationToken::new(), &|_: &PartitionReport| {});

        for report in &reports {
            let partition = grid.cell(report.cell).unwrap();
            assert_eq!(report.point_count, partition.len());
            assert_eq!(report.status, PartitionStatus::Clustered);
            assert_eq!(report.cluster_count(), 1);

            let cell_ids: HashSet<u64> = partition.points.iter().map(|p| p.id).collect();
            for id in &report.clusters[0].members {
                assert!(cell_ids.contains(id), "cell {} labelled foreign point {}", report.cell, id);
            }
        }
    }

    #[test]
    fn test_empty_partitions_are_processed() {
        let store = PointStore::from_coords(&[(0.5, 0.5)]);
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        let pool = WorkerPool::new(2).unwrap();
        let engine = Dbscan::new(DbscanParams::new(0, 0.05));

        let reports = pool.run(&grid, &engine, &CancellationToken::new(), &|_: &PartitionReport| {});

        assert_eq!(reports.len(), 9);
        assert!(reports.iter().all(|r| r.status == PartitionStatus::Clustered));
        assert_eq!(reports.iter().filter(|r| r.point_count == 0).count(), 8);
    }

    #[test]
    fn test_worker_failure_is_isolated() {
        let store = blob_store();
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        let pool = WorkerPool::new(4).unwrap();
        let engine = FaultyEngine(Dbscan::new(DbscanParams::new(2, 0.05)));

        let reports = pool.run(&grid, &engine, &CancellationToken::new(), &|_: &PartitionReport| {});

        assert_eq!(reports.len(), 9);
        let failed: Vec<&PartitionReport> = reports
            .iter()
            .filter(|r| matches!(r.status, PartitionStatus::Failed(_)))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].cell, CellIndex::new(0, 0));
        assert!(failed[0].clusters.is_empty());
        assert!(failed[0].summary_line().contains("corrupt partition"));

        let clustered: Vec<&PartitionReport> = reports
            .iter()
            .filter(|r| r.status == PartitionStatus::Clustered)
            .collect();
        assert_eq!(clustered.len(), 8);
        assert!(clustered.iter().all(|r| r.cluster_count() == 1));
    }

    #[test]
    fn test_cancelled_before_start() {
        let store = blob_store();
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        let pool = WorkerPool::new(2).unwrap();
        let engine = Dbscan::new(DbscanParams::new(2, 0.05));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let reports = pool.run(&grid, &engine, &cancel, &|_: &PartitionReport| {});

        assert_eq!(reports.len(), 9);
        assert!(reports.iter().all(|r| r.status == PartitionStatus::Cancelled));
    }

    #[test]
    fn test_cancel_from_observer_stops_remaining() {
        let store = blob_store();
        let grid = partition_points(&store, &envelope(), 3, 0.05, PartitionStrategy::Exhaustive);
        // A single worker makes dispatch strictly sequential
        let pool = WorkerPool::new(1).unwrap();
        let engine = Dbscan::new(DbscanParams::new(2, 0.05));

        let cancel = CancellationToken::new();
        let order = Mutex::new(Vec::new());
        let reports = pool.run(&grid, &engine, &cancel, &|r: &PartitionReport| {
            order.lock().unwrap().push(r.cell);
            cancel.cancel();
        });

        let clustered = reports
            .iter()
            .filter(|r| r.status == PartitionStatus::Clustered)
            .count();
        assert_eq!(clustered, 1);
        assert_eq!(order.lock().unwrap().len(), 9);
    }

    #[test]
    fn test_summary_line() {
        let report = PartitionReport {
            cell: CellIndex::new(2, 3),
            clusters: vec![LocalCluster {
                id: 0,
                members: vec![1, 2],
            }],
            point_count: 12,
            status: PartitionStatus::Clustered,
        };
        let line = report.summary_line();
        assert!(line.contains("23000000"));
        assert!(line.contains("(2,3)"));
        assert!(line.contains("[   1,    12]"));
    }

    #[test]
    fn test_pool_size() {
        assert_eq!(WorkerPool::new(3).unwrap().workers(), 3);
        assert_eq!(WorkerPool::new(0).unwrap().workers(), 1);
    }
}
