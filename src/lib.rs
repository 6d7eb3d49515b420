//! Grid-partitioned parallel DBSCAN for geographic point sets.
//!
//! This crate provides tools for:
//! - Loading latitude/longitude points from CSV exports
//! - Splitting the bounding envelope into an N×N grid of overlapping cells
//! - Running DBSCAN on every cell in parallel on a rayon worker pool
//! - Merging per-cell clusters that share points into global clusters
//!
//! # Example
//!
//! ```no_run
//! use grid_dbscan::{core::loaders::load_points_csv, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let loaded = load_points_csv("trips.csv", &config.input).unwrap();
//! let output = Pipeline::new(config).unwrap().run(&loaded.store, loaded.envelope).unwrap();
//! println!("{} clusters", output.assignment.cluster_count());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{ClusteringConfig, EnvelopeConfig, GridConfig, PipelineConfig, WorkerConfig};
pub use core::loaders::{BoundingEnvelope, Point, PointStore};
pub use processors::pipeline::{Pipeline, PipelineOutput};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
