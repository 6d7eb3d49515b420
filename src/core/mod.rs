//! Core data types and I/O operations.

pub mod loaders;
pub mod writers;

pub use loaders::{
    load_points_csv, BoundingEnvelope, Coord, LoadedPoints, LoaderError, Point, PointId,
    PointStore,
};
pub use writers::{
    write_assignment_csv, write_cluster_summary_csv, write_partition_report_csv, WriteError,
};
