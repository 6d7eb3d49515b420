//! Visualization tools for clustering results.
//!
//! Renders the global assignment as a longitude/latitude scatter plot using
//! the plotters library, optionally with the partition grid drawn on top.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::loaders::PointStore;
use crate::processors::merging::{GlobalClusterAssignment, GlobalLabel};
use crate::processors::partitioning::GridGeometry;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty point set")]
    EmptyPointSet,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1920;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 1080;

/// Color palette for cluster visualization.
const CLUSTER_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (255, 255, 51),  // Yellow
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Noise color (light gray) for unclustered points.
const NOISE_COLOR: (u8, u8, u8) = (190, 190, 190);

/// Grid line color.
const GRID_COLOR: (u8, u8, u8) = (60, 60, 60);

fn label_color(label: GlobalLabel) -> RGBColor {
    match label {
        GlobalLabel::Noise => RGBColor(NOISE_COLOR.0, NOISE_COLOR.1, NOISE_COLOR.2),
        GlobalLabel::Cluster(k) => {
            let c = CLUSTER_COLORS[k % CLUSTER_COLORS.len()];
            RGBColor(c.0, c.1, c.2)
        }
    }
}

/// Plot the assignment (x = longitude, y = latitude) and save as PNG.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `store` - The clustered points
/// * `assignment` - Global labels; points without a label are drawn as noise
/// * `grid` - When given, cell boundaries are drawn over the points
/// * `max_points` - Maximum number of points to plot (subsamples if exceeded)
pub fn plot_assignment(
    output_path: &Path,
    store: &PointStore,
    assignment: &GlobalClusterAssignment,
    grid: Option<&GridGeometry>,
    max_points: usize,
) -> Result<()> {
    if store.is_empty() {
        return Err(VisualizationError::EmptyPointSet);
    }

    let n = store.len();
    let step = if n > max_points.max(1) {
        n / max_points.max(1)
    } else {
        1
    };

    let mut noise: Vec<(f64, f64, RGBColor)> = Vec::new();
    let mut clustered: Vec<(f64, f64, RGBColor)> = Vec::with_capacity(n.min(max_points));

    for point in store.points().iter().step_by(step) {
        let label = assignment.label(point.id).unwrap_or(GlobalLabel::Noise);
        let entry = (point.long, point.lat, label_color(label));
        if label.is_noise() {
            noise.push(entry);
        } else {
            clustered.push(entry);
        }
    }

    let (x_min, x_max, y_min, y_max) = compute_bounds(noise.iter().chain(clustered.iter()));
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT))
        .into_drawing_area();

    root.fill(&WHITE).map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    // Noise first so clusters stay visible on top
    chart
        .draw_series(
            noise
                .iter()
                .chain(clustered.iter())
                .map(|(x, y, color)| Circle::new((*x, *y), 2, color.filled())),
        )
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    if let Some(geometry) = grid {
        let color = RGBColor(GRID_COLOR.0, GRID_COLOR.1, GRID_COLOR.2);
        for (from, to) in grid_lines(geometry) {
            chart
                .draw_series(LineSeries::new(vec![from, to], &color))
                .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
        }
    }

    root.present().map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    Ok(())
}

/// Un-expanded cell boundaries as `(from, to)` segments in (long, lat).
fn grid_lines(geometry: &GridGeometry) -> Vec<((f64, f64), (f64, f64))> {
    let sw = geometry.envelope.southwest;
    let ne = geometry.envelope.northeast;
    let n = geometry.resolution;

    let mut lines = Vec::with_capacity(2 * (n + 1));
    for k in 0..=n {
        let x = sw.long + k as f64 * geometry.inc_x;
        lines.push(((x, sw.lat), (x, ne.lat)));
        let y = sw.lat + k as f64 * geometry.inc_y;
        lines.push(((sw.long, y), (ne.long, y)));
    }
    lines
}

/// Compute the bounds (min/max) for x and y coordinates.
fn compute_bounds<'a, I>(points: I) -> (f64, f64, f64, f64)
where
    I: IntoIterator<Item = &'a (f64, f64, RGBColor)>,
{
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for (x, y, _) in points {
        if *x < x_min { x_min = *x; }
        if *x > x_max { x_max = *x; }
        if *y < y_min { y_min = *y; }
        if *y > y_max { y_max = *y; }
    }

    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{BoundingEnvelope, Coord};
    use crate::processors::merging::merge_partitions;
    use tempfile::tempdir;

    #[test]
    fn test_empty_store_rejected() {
        let dir = tempdir().unwrap();
        let store = PointStore::from_coords(&[]);
        let assignment = merge_partitions(&store, &[]);

        let result = plot_assignment(&dir.path().join("plot.png"), &store, &assignment, None, 100);

        assert!(matches!(result, Err(VisualizationError::EmptyPointSet)));
    }

    #[test]
    fn test_bounds_pad_degenerate_axis() {
        let color = label_color(GlobalLabel::Noise);
        let points = [(3.0, 5.0, color), (3.0, 7.0, color)];

        let (x_min, x_max, y_min, y_max) = compute_bounds(points.iter());

        assert_eq!((x_min, x_max), (2.0, 4.0));
        assert_eq!((y_min, y_max), (5.0, 7.0));
    }

    #[test]
    fn test_grid_lines_cover_envelope() {
        let envelope = BoundingEnvelope::new(Coord::new(0.0, 0.0), Coord::new(2.0, 4.0));
        let geometry = GridGeometry::new(envelope, 2, 0.1);

        let lines = grid_lines(&geometry);

        assert_eq!(lines.len(), 6);
        assert!(lines.contains(&((2.0, 0.0), (2.0, 2.0))));
        assert!(lines.contains(&((0.0, 1.0), (4.0, 1.0))));
    }

    #[test]
    fn test_cluster_colors_wrap() {
        let first = label_color(GlobalLabel::Cluster(0));
        let wrapped = label_color(GlobalLabel::Cluster(CLUSTER_COLORS.len()));

        assert_eq!(first, wrapped);
        assert_ne!(first, label_color(GlobalLabel::Noise));
    }
}
