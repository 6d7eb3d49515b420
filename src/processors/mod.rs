//! Data processing modules.

pub mod dbscan;
pub mod merging;
pub mod partitioning;
pub mod pipeline;
pub mod pool;

// Re-export key types for convenience
pub use dbscan::{ClusterEngine, Dbscan, DbscanParams, LocalCluster};
pub use merging::{
    merge_partitions, ClusterLabel, ClusterSummary, GlobalClusterAssignment, GlobalLabel,
};
pub use partitioning::{partition_points, CellIndex, Grid, GridGeometry, Partition};
pub use pipeline::{resolve_envelope, Pipeline, PipelineError, PipelineOutput};
pub use pool::{CancellationToken, PartitionReport, PartitionStatus, WorkerPool};
