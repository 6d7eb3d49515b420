//! Command-line interface for the grid DBSCAN pipeline.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{available_parallelism, EnvelopeConfig, Expansion, PartitionStrategy};
use crate::core::loaders::{self, Coord, LoadedPoints};
use crate::core::writers;
use crate::processors::partitioning::{partition_points, Grid, GridGeometry};
use crate::processors::pipeline::{resolve_envelope, Pipeline};
use crate::processors::pool::PartitionReport;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "grid-dbscan")]
#[command(about = "Grid-partitioned parallel DBSCAN for geographic points", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster a point file and write assignment, cluster and partition reports
    Cluster {
        /// Input CSV file
        input: PathBuf,
        /// Output directory (defaults to the input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
        /// Also render a PNG scatter plot of the clusters
        #[arg(long)]
        plot: bool,
        /// Maximum number of points to plot (subsamples if exceeded)
        #[arg(long, default_value_t = 1_000_000)]
        max_plot_points: usize,
    },

    /// Partition a point file and print grid occupancy statistics
    Partition {
        /// Input CSV file
        input: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Write the default configuration as YAML
    InitConfig {
        /// Destination YAML file
        path: PathBuf,
    },
}

/// Command-line overrides for individual configuration fields.
#[derive(Args, Debug, Default, Clone)]
struct Overrides {
    /// Grid resolution N (N×N cells)
    #[arg(long)]
    grid: Option<usize>,
    /// Neighbour count a point must exceed to be core
    #[arg(long)]
    min_density: Option<usize>,
    /// Neighbourhood radius in degrees
    #[arg(long)]
    epsilon: Option<f64>,
    /// Worker thread count (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,
    /// Fixed envelope south-west corner as "lat,long"
    #[arg(long, value_parser = parse_coord, requires = "northeast")]
    southwest: Option<Coord>,
    /// Fixed envelope north-east corner as "lat,long"
    #[arg(long, value_parser = parse_coord, requires = "southwest")]
    northeast: Option<Coord>,
    /// Expand clusters through every reachable core point
    #[arg(long)]
    transitive: bool,
    /// Scan only the cells around each point's coordinates
    #[arg(long)]
    halo: bool,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(n) = self.grid {
            config.grid.resolution = n;
        }
        if let Some(min_density) = self.min_density {
            config.clustering.min_density = min_density;
        }
        if let Some(eps) = self.epsilon {
            config.clustering.epsilon = eps;
        }
        if let Some(workers) = self.workers {
            config.workers.threads = Some(workers);
        }
        if let (Some(southwest), Some(northeast)) = (self.southwest, self.northeast) {
            config.envelope = EnvelopeConfig::Fixed {
                southwest,
                northeast,
            };
        }
        if self.transitive {
            config.clustering.expansion = Expansion::Transitive;
        }
        if self.halo {
            config.grid.strategy = PartitionStrategy::Halo;
        }
    }
}

/// Parse a `lat,long` pair.
fn parse_coord(s: &str) -> std::result::Result<Coord, String> {
    let (lat, long) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,long\", got '{}'", s))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
    let long: f64 = long
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude '{}': {}", long.trim(), e))?;
    if !lat.is_finite() || !long.is_finite() {
        return Err(format!("coordinates must be finite, got '{}'", s));
    }
    Ok(Coord::new(lat, long))
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar ticking once per partition
fn create_partition_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} partitions")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 37 {
            format!("{}...", value.chars().take(34).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<37} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Cluster {
            input,
            output_dir,
            overrides,
            plot,
            max_plot_points,
        } => cmd_cluster(&input, output_dir, &overrides, plot, max_plot_points, config),
        Commands::Partition { input, overrides } => cmd_partition(&input, &overrides, config),
        Commands::InitConfig { path } => cmd_init_config(&path, &config),
    });

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let config = PipelineConfig::from_yaml(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn load_input(input: &Path, config: &PipelineConfig) -> Result<LoadedPoints> {
    let spinner = create_spinner("Loading points...");
    let loaded = loaders::load_points_csv(input, &config.input);
    spinner.finish_and_clear();
    loaded.with_context(|| format!("failed to load points from {}", input.display()))
}

fn envelope_mode(config: &PipelineConfig) -> &'static str {
    match config.envelope {
        EnvelopeConfig::Computed => "computed",
        EnvelopeConfig::Fixed { .. } => "fixed",
    }
}

fn cmd_cluster(
    input: &Path,
    output_dir: Option<PathBuf>,
    overrides: &Overrides,
    plot: bool,
    max_plot_points: usize,
    mut config: PipelineConfig,
) -> Result<()> {
    let start = Instant::now();
    overrides.apply(&mut config);

    // Default output directory to same as input
    let effective_output_dir = output_dir.unwrap_or_else(|| {
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "points".to_string());

    println!("Running grid DBSCAN...");
    println!("Input: {}", input.display());
    println!("Output directory: {}", effective_output_dir.display());
    println!("Parameters:");
    println!("  grid: {}x{}", config.grid.resolution, config.grid.resolution);
    println!("  min_density: {}", config.clustering.min_density);
    println!("  epsilon: {}", config.clustering.epsilon);
    println!("  expansion: {:?}", config.clustering.expansion);
    println!("  envelope: {}", envelope_mode(&config));

    let pipeline = Pipeline::new(config).context("invalid configuration")?;
    let loaded = load_input(input, pipeline.config())?;

    let n = pipeline.config().grid.resolution;
    let pb = create_partition_bar(n * n);
    let observer = |report: &PartitionReport| {
        pb.println(report.summary_line());
        pb.inc(1);
    };

    let output = pipeline.run_with_observer(&loaded.store, loaded.envelope, &observer);
    pb.finish_and_clear();
    let output = output.context("clustering failed")?;

    let assignment_path = effective_output_dir.join(format!("{}_assignment.csv", stem));
    let clusters_path = effective_output_dir.join(format!("{}_clusters.csv", stem));
    let partitions_path = effective_output_dir.join(format!("{}_partitions.csv", stem));

    writers::write_assignment_csv(&assignment_path, &loaded.store, &output.assignment)?;
    writers::write_cluster_summary_csv(&clusters_path, &loaded.store, &output.assignment)?;
    writers::write_partition_report_csv(&partitions_path, &output.reports)?;

    let plot_path = if plot {
        let path = effective_output_dir.join(format!("{}_clusters.png", stem));
        let geometry = GridGeometry::new(
            output.envelope,
            pipeline.config().grid.resolution,
            pipeline.config().clustering.epsilon,
        );
        crate::visualization::plot_assignment(
            &path,
            &loaded.store,
            &output.assignment,
            Some(&geometry),
            max_plot_points,
        )
        .context("failed to render cluster plot")?;
        Some(path)
    } else {
        None
    };

    let mut items = vec![
        ("Input file", input.display().to_string()),
        ("Assignment CSV", assignment_path.display().to_string()),
        ("Clusters CSV", clusters_path.display().to_string()),
        ("Partitions CSV", partitions_path.display().to_string()),
    ];
    if let Some(path) = plot_path {
        items.push(("Plot PNG", path.display().to_string()));
    }
    items.extend([
        ("Points", loaded.store.len().to_string()),
        ("Skipped records", loaded.skipped.to_string()),
        ("Outside envelope", output.outside_points.to_string()),
        ("Failed partitions", output.failed_partitions().to_string()),
        ("Clusters found", output.assignment.cluster_count().to_string()),
        ("Noise points", output.assignment.noise_count().to_string()),
        ("Available cores", available_parallelism().to_string()),
        ("Workers", output.workers.to_string()),
        ("Clustering time", format!("{:.2?}", output.elapsed)),
        ("Duration", format!("{:.2?}", start.elapsed())),
    ]);

    print_summary("Clustering Complete", &items);
    Ok(())
}

/// Cell occupancy figures for a partitioned grid.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Occupancy {
    non_empty: usize,
    min: usize,
    max: usize,
    mean: f64,
    /// Memberships beyond one per partitioned point
    duplicated: usize,
}

fn occupancy(grid: &Grid<'_>, points: usize) -> Occupancy {
    let sizes: Vec<usize> = grid.cells().iter().map(|c| c.len()).collect();
    let total = grid.total_memberships();
    let placed = points.saturating_sub(grid.outside_points());

    Occupancy {
        non_empty: grid.non_empty_cells(),
        min: sizes.iter().copied().min().unwrap_or(0),
        max: sizes.iter().copied().max().unwrap_or(0),
        mean: if sizes.is_empty() {
            0.0
        } else {
            total as f64 / sizes.len() as f64
        },
        duplicated: total.saturating_sub(placed),
    }
}

fn cmd_partition(input: &Path, overrides: &Overrides, mut config: PipelineConfig) -> Result<()> {
    let start = Instant::now();
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let loaded = load_input(input, &config)?;
    let envelope = resolve_envelope(loaded.envelope, &config.envelope);
    let grid = partition_points(
        &loaded.store,
        &envelope,
        config.grid.resolution,
        config.clustering.epsilon,
        config.grid.strategy,
    );
    let stats = occupancy(&grid, loaded.store.len());

    print_summary(
        "Partitioning Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Points", loaded.store.len().to_string()),
            ("Skipped records", loaded.skipped.to_string()),
            ("Envelope", format!("{} .. {}", envelope.southwest, envelope.northeast)),
            ("Grid", format!("{0}x{0}", grid.resolution())),
            ("Non-empty cells", stats.non_empty.to_string()),
            ("Min points/cell", stats.min.to_string()),
            ("Max points/cell", stats.max.to_string()),
            ("Mean points/cell", format!("{:.2}", stats.mean)),
            ("Duplicated", stats.duplicated.to_string()),
            ("Outside envelope", grid.outside_points().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_init_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    config
        .to_yaml(path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    println!("Wrote configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{BoundingEnvelope, PointStore};

    #[test]
    fn test_parse_coord() {
        let coord = parse_coord("40.7, -74.0").unwrap();
        assert_eq!(coord, Coord::new(40.7, -74.0));

        assert!(parse_coord("40.7").is_err());
        assert!(parse_coord("north,-74").is_err());
        assert!(parse_coord("NaN,1").is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = PipelineConfig::default();
        let overrides = Overrides {
            grid: Some(4),
            epsilon: Some(0.5),
            workers: Some(3),
            southwest: Some(Coord::new(40.7, -74.0)),
            northeast: Some(Coord::new(40.8, -73.93)),
            transitive: true,
            ..Default::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.grid.resolution, 4);
        assert_eq!(config.clustering.epsilon, 0.5);
        assert_eq!(config.clustering.min_density, 5);
        assert_eq!(config.workers.threads, Some(3));
        assert_eq!(config.clustering.expansion, Expansion::Transitive);
        assert_eq!(config.grid.strategy, PartitionStrategy::Exhaustive);
        assert!(matches!(config.envelope, EnvelopeConfig::Fixed { .. }));
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = PipelineConfig::default();
        Overrides::default().apply(&mut config);

        assert_eq!(config.grid.resolution, 20);
        assert_eq!(config.envelope, EnvelopeConfig::Computed);
    }

    #[test]
    fn test_occupancy_counts_overlap() {
        // longitude 1.0 lies in the overlap of both columns of a 2x2 grid
        let store = PointStore::from_coords(&[(0.5, 0.5), (0.5, 1.0), (1.5, 1.5)]);
        let envelope = BoundingEnvelope::new(Coord::new(0.0, 0.0), Coord::new(2.0, 2.0));
        let grid = partition_points(&store, &envelope, 2, 0.1, PartitionStrategy::Exhaustive);

        let stats = occupancy(&grid, store.len());

        assert_eq!(stats.non_empty, 3);
        assert_eq!(stats.min, 0);
        assert_eq!(stats.max, 2);
        assert_eq!(stats.duplicated, 1);
        assert!((stats.mean - 1.0).abs() < 1e-12);
    }
}
