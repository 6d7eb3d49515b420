//! Point records and the CSV loader that produces them.
//!
//! This module provides:
//! - `Point`, `Coord` and `BoundingEnvelope`, the immutable inputs of the pipeline
//! - `PointStore`, a uniquely-identified collection of points
//! - `load_points_csv`, which reads trip records and skips malformed rows

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::InputConfig;

/// Number of malformed records logged individually before only counting.
const MAX_LOGGED_SKIPS: usize = 5;

/// Errors that can occur while loading points.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("input unavailable '{path}': {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("no valid records in '{path}' ({skipped} skipped)")]
    NoValidRecords { path: PathBuf, skipped: usize },

    #[error("duplicate point id {0}")]
    DuplicateId(PointId),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Unique, positive point identifier.
pub type PointId = u64;

/// A latitude/longitude pair treated as planar coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub long: f64,
}

impl Coord {
    #[inline]
    pub fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.long)
    }
}

/// A single point to be clustered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub id: PointId,
    pub lat: f64,
    pub long: f64,
}

impl Point {
    #[inline]
    pub fn new(id: PointId, lat: f64, long: f64) -> Self {
        Self { id, lat, long }
    }

    /// Plain Euclidean distance on (lat, long), without geodesic correction.
    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        let dlat = other.lat - self.lat;
        let dlong = other.long - self.long;
        (dlat * dlat + dlong * dlong).sqrt()
    }

    #[inline]
    pub fn coord(&self) -> Coord {
        Coord::new(self.lat, self.long)
    }
}

/// South-west and north-east corners of the clustering universe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingEnvelope {
    pub southwest: Coord,
    pub northeast: Coord,
}

impl BoundingEnvelope {
    pub fn new(southwest: Coord, northeast: Coord) -> Self {
        Self {
            southwest,
            northeast,
        }
    }

    /// Tightest envelope around `points`, or `None` when there are none.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut sw = first.coord();
        let mut ne = first.coord();

        for p in &points[1..] {
            sw.lat = sw.lat.min(p.lat);
            sw.long = sw.long.min(p.long);
            ne.lat = ne.lat.max(p.lat);
            ne.long = ne.long.max(p.long);
        }

        Some(Self::new(sw, ne))
    }
}

/// Immutable collection of uniquely-identified points.
#[derive(Debug, Clone, Default)]
pub struct PointStore {
    points: Vec<Point>,
}

impl PointStore {
    /// Build a store, rejecting duplicate ids.
    pub fn new(points: Vec<Point>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(points.len());
        for p in &points {
            if !seen.insert(p.id) {
                return Err(LoaderError::DuplicateId(p.id));
            }
        }
        Ok(Self { points })
    }

    /// Build a store from coordinates, numbering points from 1.
    pub fn from_coords(coords: &[(f64, f64)]) -> Self {
        let points = coords
            .iter()
            .enumerate()
            .map(|(i, &(lat, long))| Point::new(i as PointId + 1, lat, long))
            .collect();
        Self { points }
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn envelope(&self) -> Option<BoundingEnvelope> {
        BoundingEnvelope::from_points(&self.points)
    }
}

/// Outcome of loading a point file.
#[derive(Debug, Clone)]
pub struct LoadedPoints {
    pub store: PointStore,
    /// Envelope of the accepted points
    pub envelope: BoundingEnvelope,
    /// Records skipped because a coordinate was missing or not numeric
    pub skipped: usize,
}

/// Parse one coordinate field, rejecting non-finite values.
fn parse_coord(record: &csv::StringRecord, column: usize) -> Option<f64> {
    record
        .get(column)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Load points from a delimited trip file.
///
/// Ids are assigned sequentially from 1 in the order records are accepted.
/// Records with a missing or non-numeric coordinate are skipped and counted
/// rather than aborting the load.
///
/// # Errors
///
/// - `Unavailable` if the file cannot be opened
/// - `EmptyFile` if it contains no data rows
/// - `NoValidRecords` if every data row was malformed
/// - `Csv` on an underlying read failure
pub fn load_points_csv<P: AsRef<Path>>(path: P, config: &InputConfig) -> Result<LoadedPoints> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| LoaderError::Unavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut points = Vec::with_capacity(4096);
    let mut rows = 0usize;
    let mut skipped = 0usize;

    for (row, result) in reader.records().enumerate() {
        rows += 1;

        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                skipped += 1;
                if skipped <= MAX_LOGGED_SKIPS {
                    warn!("{}: skipping row {}: {}", path.display(), row + 1, e);
                }
                continue;
            }
        };

        match (
            parse_coord(&record, config.lat_column),
            parse_coord(&record, config.long_column),
        ) {
            (Some(lat), Some(long)) => {
                let id = points.len() as PointId + 1;
                points.push(Point::new(id, lat, long));
            }
            _ => {
                skipped += 1;
                if skipped <= MAX_LOGGED_SKIPS {
                    warn!(
                        "{}: skipping row {}: non-numeric coordinate in columns {}/{}",
                        path.display(),
                        row + 1,
                        config.lat_column,
                        config.long_column
                    );
                }
            }
        }
    }

    if rows == 0 {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    if skipped > 0 {
        warn!("{}: {} records skipped", path.display(), skipped);
    }

    let envelope = match BoundingEnvelope::from_points(&points) {
        Some(envelope) => envelope,
        None => {
            return Err(LoaderError::NoValidRecords {
                path: path.to_path_buf(),
                skipped,
            })
        }
    };

    debug!(
        "{}: loaded {} points, SW {} NE {}",
        path.display(),
        points.len(),
        envelope.southwest,
        envelope.northeast
    );

    Ok(LoadedPoints {
        store: PointStore { points },
        envelope,
        skipped,
    })
}
