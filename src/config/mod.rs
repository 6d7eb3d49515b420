//! Configuration types for the clustering pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::loaders::Coord;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// How points are matched against grid cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Test every point against all N×N expanded cells.
    #[default]
    Exhaustive,
    /// Test every point only against the cells its coordinates can reach.
    Halo,
}

/// Configuration for the spatial grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Number of cells along each axis (the grid is N×N)
    #[serde(default = "default_resolution")]
    pub resolution: usize,

    /// Cell membership strategy
    #[serde(default)]
    pub strategy: PartitionStrategy,
}

fn default_resolution() -> usize {
    20
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            strategy: PartitionStrategy::default(),
        }
    }
}

/// Neighbourhood expansion performed once a core point seeds a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expansion {
    /// Expand each neighbour of the seed once; neighbours merged in during
    /// that step are not expanded again.
    #[default]
    SingleLevel,
    /// Keep expanding newly merged core points until the cluster stops growing.
    Transitive,
}

/// Configuration for DBSCAN clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// A point is core when its neighbour count is strictly greater than this
    #[serde(default = "default_min_density")]
    pub min_density: usize,

    /// Neighbourhood radius, in coordinate units
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default)]
    pub expansion: Expansion,
}

fn default_min_density() -> usize {
    5
}

fn default_epsilon() -> f64 {
    0.0003
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_density: default_min_density(),
            epsilon: default_epsilon(),
            expansion: Expansion::default(),
        }
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker thread count. `None` sizes the pool to the host's available parallelism.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl WorkerConfig {
    /// Number of workers the pool will actually run with.
    pub fn effective_threads(&self) -> usize {
        self.threads.unwrap_or_else(available_parallelism)
    }
}

/// Number of parallel execution units reported by the host.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Where the clustering universe comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EnvelopeConfig {
    /// Use the bounding box of the loaded points.
    #[default]
    Computed,
    /// Use explicit corners regardless of the data.
    Fixed { southwest: Coord, northeast: Coord },
}

/// Column layout of the input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Zero-based column holding latitude
    #[serde(default = "default_lat_column")]
    pub lat_column: usize,

    /// Zero-based column holding longitude
    #[serde(default = "default_long_column")]
    pub long_column: usize,

    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
}

fn default_lat_column() -> usize {
    9
}

fn default_long_column() -> usize {
    8
}

fn default_has_headers() -> bool {
    true
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            lat_column: default_lat_column(),
            long_column: default_long_column(),
            has_headers: default_has_headers(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub envelope: EnvelopeConfig,

    #[serde(default)]
    pub input: InputConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.grid.resolution == 0 {
            return Err(ConfigError::Invalid(
                "grid resolution must be at least 1".to_string(),
            ));
        }
        let eps = self.clustering.epsilon;
        if !eps.is_finite() || eps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "epsilon must be finite and positive, got {}",
                eps
            )));
        }
        if self.workers.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "worker thread count must be at least 1".to_string(),
            ));
        }
        if let EnvelopeConfig::Fixed {
            southwest,
            northeast,
        } = &self.envelope
        {
            if !(southwest.lat < northeast.lat && southwest.long < northeast.long) {
                return Err(ConfigError::Invalid(format!(
                    "fixed envelope southwest {} must lie strictly south-west of northeast {}",
                    southwest, northeast
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.grid.resolution, 20);
        assert_eq!(config.clustering.min_density, 5);
        assert_eq!(config.clustering.epsilon, 0.0003);
        assert_eq!(config.clustering.expansion, Expansion::SingleLevel);
        assert_eq!(config.envelope, EnvelopeConfig::Computed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_threads_defaults_to_host() {
        let workers = WorkerConfig::default();
        assert_eq!(workers.effective_threads(), available_parallelism());

        let workers = WorkerConfig { threads: Some(3) };
        assert_eq!(workers.effective_threads(), 3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "clustering:\n  epsilon: 0.5\nenvelope:\n  mode: fixed\n  southwest: { lat: 40.7, long: -74.0 }\n  northeast: { lat: 40.8, long: -73.93 }\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.clustering.epsilon, 0.5);
        assert_eq!(config.clustering.min_density, 5);
        assert_eq!(config.grid.resolution, 20);
        assert_eq!(
            config.envelope,
            EnvelopeConfig::Fixed {
                southwest: Coord::new(40.7, -74.0),
                northeast: Coord::new(40.8, -73.93),
            }
        );
    }

    #[test]
    fn test_yaml_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = PipelineConfig::default();
        config.grid.strategy = PartitionStrategy::Halo;
        config.clustering.expansion = Expansion::Transitive;
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.grid.strategy, PartitionStrategy::Halo);
        assert_eq!(loaded.clustering.expansion, Expansion::Transitive);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.grid.resolution = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = PipelineConfig::default();
        config.clustering.epsilon = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.clustering.epsilon = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.workers.threads = Some(0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.envelope = EnvelopeConfig::Fixed {
            southwest: Coord::new(41.0, -74.0),
            northeast: Coord::new(40.0, -73.0),
        };
        assert!(config.validate().is_err());
    }
}
