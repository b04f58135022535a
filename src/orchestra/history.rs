use std::collections::BTreeMap;

use comms::specs::{Metrics, Scalar};
use serde::Serialize;

/// Metric values keyed by name, each one a series of `(round, value)` pairs.
pub type MetricSeries = BTreeMap<String, Vec<(u64, Scalar)>>;

/// The append-only record of a campaign's losses and metrics, keyed by round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    pub losses_distributed: Vec<(u64, f64)>,
    pub losses_centralized: Vec<(u64, f64)>,
    pub metrics_distributed_fit: MetricSeries,
    pub metrics_distributed: MetricSeries,
    pub metrics_centralized: MetricSeries,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loss_distributed(&mut self, round: u64, loss: f64) {
        self.losses_distributed.push((round, loss));
    }

    pub fn add_loss_centralized(&mut self, round: u64, loss: f64) {
        self.losses_centralized.push((round, loss));
    }

    pub fn add_metrics_distributed_fit(&mut self, round: u64, metrics: &Metrics) {
        Self::append(&mut self.metrics_distributed_fit, round, metrics);
    }

    pub fn add_metrics_distributed(&mut self, round: u64, metrics: &Metrics) {
        Self::append(&mut self.metrics_distributed, round, metrics);
    }

    pub fn add_metrics_centralized(&mut self, round: u64, metrics: &Metrics) {
        Self::append(&mut self.metrics_centralized, round, metrics);
    }

    /// Every round that left at least one entry, in increasing order.
    pub fn rounds(&self) -> Vec<u64> {
        let losses = self
            .losses_distributed
            .iter()
            .chain(&self.losses_centralized)
            .map(|&(round, _)| round);

        let metrics = [
            &self.metrics_distributed_fit,
            &self.metrics_distributed,
            &self.metrics_centralized,
        ]
        .into_iter()
        .flat_map(|series| series.values().flatten().map(|(round, _)| *round));

        let mut rounds: Vec<_> = losses.chain(metrics).collect();
        rounds.sort_unstable();
        rounds.dedup();
        rounds
    }

    fn append(series: &mut MetricSeries, round: u64, metrics: &Metrics) {
        for (name, value) in metrics {
            series
                .entry(name.clone())
                .or_default()
                .push((round, value.clone()));
        }
    }
}
