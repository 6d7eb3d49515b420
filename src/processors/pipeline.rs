//! End-to-end clustering pipeline: partition, cluster in parallel, merge.
//!
//! The three stages are separated by hard barriers. Partitioning finishes on
//! the calling thread before any worker starts, and merging only begins once
//! every worker has reported.

use std::time::{Duration, Instant};

use log::info;
use thiserror::Error;

use super::dbscan::{Dbscan, DbscanParams};
use super::merging::{merge_partitions, GlobalClusterAssignment};
use super::partitioning::partition_points;
use super::pool::{CancellationToken, PartitionReport, PartitionStatus, WorkerPool};
use crate::config::{ConfigError, EnvelopeConfig, PipelineConfig};
use crate::core::loaders::{BoundingEnvelope, PointStore};

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("run cancelled after {completed} of {total} partitions")]
    Cancelled { completed: usize, total: usize },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Envelope the grid was built on
    pub envelope: BoundingEnvelope,
    /// One report per grid cell, in grid order
    pub reports: Vec<PartitionReport>,
    pub assignment: GlobalClusterAssignment,
    /// Points outside every cell
    pub outside_points: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

impl PipelineOutput {
    pub fn failed_partitions(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, PartitionStatus::Failed(_)))
            .count()
    }

    /// Cell memberships across all partitions, counting overlap copies.
    pub fn partitioned_points(&self) -> usize {
        self.reports.iter().map(|r| r.point_count).sum()
    }
}

/// Pick the envelope to grid on: the data's own, or the configured override.
pub fn resolve_envelope(computed: BoundingEnvelope, config: &EnvelopeConfig) -> BoundingEnvelope {
    match config {
        EnvelopeConfig::Computed => {
            info!(
                "Using computed envelope SW {} NE {}",
                computed.southwest, computed.northeast
            );
            computed
        }
        EnvelopeConfig::Fixed {
            southwest,
            northeast,
        } => {
            info!(
                "Using fixed envelope SW {} NE {} (data spans SW {} NE {})",
                southwest, northeast, computed.southwest, computed.northeast
            );
            BoundingEnvelope::new(*southwest, *northeast)
        }
    }
}

/// Configured clustering pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that stops the run before the next partition is dispatched.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run all stages over `store`. `computed` is the envelope of the data.
    pub fn run(&self, store: &PointStore, computed: BoundingEnvelope) -> Result<PipelineOutput> {
        self.run_with_observer(store, computed, &|_: &PartitionReport| {})
    }

    /// Like `run`, calling `observer` from a worker as each partition finishes.
    pub fn run_with_observer<F>(
        &self,
        store: &PointStore,
        computed: BoundingEnvelope,
        observer: &F,
    ) -> Result<PipelineOutput>
    where
        F: Fn(&PartitionReport) + Sync + ?Sized,
    {
        let start = Instant::now();
        let config = &self.config;

        let envelope = resolve_envelope(computed, &config.envelope);
        let grid = partition_points(
            store,
            &envelope,
            config.grid.resolution,
            config.clustering.epsilon,
            config.grid.strategy,
        );

        let pool = WorkerPool::new(config.workers.effective_threads())?;
        let engine = Dbscan::new(DbscanParams::from(&config.clustering));
        let params = engine.params();
        info!(
            "Clustering {} partitions on {} workers (min_density={}, eps={}, expansion={:?})",
            grid.cells().len(),
            pool.workers(),
            params.min_density,
            params.epsilon,
            params.expansion
        );

        let reports = pool.run(&grid, &engine, &self.cancel, observer);

        let cancelled = reports
            .iter()
            .filter(|r| r.status == PartitionStatus::Cancelled)
            .count();
        if cancelled > 0 {
            return Err(PipelineError::Cancelled {
                completed: reports.len() - cancelled,
                total: reports.len(),
            });
        }

        let assignment = merge_partitions(store, &reports);

        Ok(PipelineOutput {
            envelope,
            outside_points: grid.outside_points(),
            reports,
            assignment,
            workers: pool.workers(),
            elapsed: start.elapsed(),
        })
    }
}
