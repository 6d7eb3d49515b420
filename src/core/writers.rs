//! Data writers for clustering results.
//!
//! This module provides CSV writers for:
//! - the global point assignment (`id,lat,long,label`)
//! - per-cluster centroids and sizes
//! - per-partition reports

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use super::loaders::PointStore;
use crate::processors::merging::{GlobalClusterAssignment, GlobalLabel};
use crate::processors::pool::PartitionReport;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// A CSV writer bound to its output path for error reporting.
struct CsvOut {
    writer: csv::Writer<BufWriter<File>>,
    path: String,
}

impl CsvOut {
    fn create(path: &Path) -> Result<Self> {
        ensure_parent_dirs(path)?;
        let file = File::create(path).map_err(|e| WriteError::CreateFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            writer: csv::Writer::from_writer(BufWriter::new(file)),
            path: path.display().to_string(),
        })
    }

    fn row<I, T>(&mut self, record: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|e| WriteError::CsvError {
                path: self.path.clone(),
                source: e,
            })
    }

    fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|e| WriteError::WriteFile {
            path: self.path,
            source: e,
        })
    }
}

/// Write the global assignment as `id,lat,long,label`, one row per point.
///
/// Noise points get label `-1`. Rows follow the store's point order.
///
/// # Example
///
/// ```no_run
/// use grid_dbscan::core::loaders::PointStore;
/// use grid_dbscan::core::writers::write_assignment_csv;
/// use grid_dbscan::processors::merging::merge_partitions;
/// use std::path::Path;
///
/// let store = PointStore::from_coords(&[(40.75, -73.98)]);
/// let assignment = merge_partitions(&store, &[]);
/// write_assignment_csv(Path::new("assignment.csv"), &store, &assignment).unwrap();
/// ```
pub fn write_assignment_csv(
    path: &Path,
    store: &PointStore,
    assignment: &GlobalClusterAssignment,
) -> Result<()> {
    let mut out = CsvOut::create(path)?;
    out.row(["id", "lat", "long", "label"])?;

    for point in store.points() {
        let label = assignment.label(point.id).unwrap_or(GlobalLabel::Noise);
        out.row([
            point.id.to_string(),
            format!("{:.6}", point.lat),
            format!("{:.6}", point.long),
            label.as_i64().to_string(),
        ])?;
    }

    out.finish()
}

/// Write one row per global cluster: `label,avg_long,avg_lat,points`,
/// largest cluster first.
pub fn write_cluster_summary_csv(
    path: &Path,
    store: &PointStore,
    assignment: &GlobalClusterAssignment,
) -> Result<()> {
    let mut out = CsvOut::create(path)?;
    out.row(["label", "avg_long", "avg_lat", "points"])?;

    for summary in assignment.summaries(store) {
        out.row([
            summary.label.to_string(),
            format!("{:.6}", summary.avg_long),
            format!("{:.6}", summary.avg_lat),
            summary.points.to_string(),
        ])?;
    }

    out.finish()
}

/// Write one row per partition: `i,j,offset,status,clusters,points`.
pub fn write_partition_report_csv(path: &Path, reports: &[PartitionReport]) -> Result<()> {
    let mut out = CsvOut::create(path)?;
    out.row(["i", "j", "offset", "status", "clusters", "points"])?;

    for report in reports {
        out.row([
            report.cell.i.to_string(),
            report.cell.j.to_string(),
            report.cell.offset().to_string(),
            report.status.to_string(),
            report.cluster_count().to_string(),
            report.point_count.to_string(),
        ])?;
    }

    out.finish()
}
