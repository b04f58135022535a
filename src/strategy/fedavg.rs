use std::collections::HashMap;

use comms::specs::{EvaluateIns, EvaluateRes, FitIns, FitRes, Metrics, Parameters, Scalar};
use log::{debug, warn};

use super::{Selection, Strategy};
use crate::{
    configs::FedAvgConfig,
    orchestra::{dispatcher::Failure, registry::WorkerRegistry, worker::WorkerHandle},
};

/// Federated averaging: every worker's parameters weighted by how many examples it trained on.
pub struct FedAvg {
    config: FedAvgConfig,
    initial: Option<Parameters>,
}

impl FedAvg {
    /// Creates a new `FedAvg` strategy.
    ///
    /// # Arguments
    /// * `config` - The sampling fractions and minimum worker counts.
    pub fn new(config: FedAvgConfig) -> Self {
        Self {
            config,
            initial: None,
        }
    }

    /// Starts the campaign from the given parameters instead of asking a worker.
    pub fn with_initial_parameters(mut self, parameters: Parameters) -> Self {
        self.initial = Some(parameters);
        self
    }

    fn sample_size(fraction: f64, available: usize, min: usize) -> usize {
        ((available as f64 * fraction) as usize).max(min)
    }

    fn sample<I: Clone>(
        &self,
        registry: &WorkerRegistry,
        fraction: f64,
        min: usize,
        ins: I,
    ) -> Selection<I> {
        let size = Self::sample_size(fraction, registry.num_available(), min);

        registry
            .sample(self.config.min_available_workers, size)
            .into_iter()
            .map(|w| (w, ins.clone()))
            .collect()
    }
}

impl Strategy for FedAvg {
    fn initialize_parameters(&self, _registry: &WorkerRegistry) -> Option<Parameters> {
        self.initial.clone()
    }

    fn configure_fit(
        &self,
        _round: u64,
        parameters: &Parameters,
        registry: &WorkerRegistry,
    ) -> Selection<FitIns> {
        let ins = FitIns {
            parameters: parameters.clone(),
            config: Default::default(),
        };

        self.sample(
            registry,
            self.config.fraction_fit,
            self.config.min_fit_workers,
            ins,
        )
    }

    fn configure_evaluate(
        &self,
        _round: u64,
        parameters: &Parameters,
        registry: &WorkerRegistry,
    ) -> Selection<EvaluateIns> {
        if self.config.fraction_evaluate == 0.0 {
            return Vec::new();
        }

        let ins = EvaluateIns {
            parameters: parameters.clone(),
            config: Default::default(),
        };

        self.sample(
            registry,
            self.config.fraction_evaluate,
            self.config.min_evaluate_workers,
            ins,
        )
    }

    fn aggregate_fit(
        &self,
        active: usize,
        round: u64,
        results: &[(WorkerHandle, FitRes)],
        failures: &[Failure<FitRes>],
    ) -> (Option<Parameters>, Metrics) {
        debug!(
            "round {round}: averaging {} results ({} failures) over {active} active workers",
            results.len(),
            failures.len()
        );

        let updates = results.iter().filter_map(|(worker, res)| {
            let Some(tensors) = res.parameters.to_f32() else {
                warn!(worker_id = worker.id().as_str(); "unreadable parameters, skipping");
                return None;
            };
            Some((tensors, res.num_examples))
        });

        let parameters = weighted_average(updates).map(|avg| Parameters::from_f32(&avg));
        let metrics = weighted_metrics(results.iter().map(|(_, r)| (&r.metrics, r.num_examples)));

        (parameters, metrics)
    }

    fn aggregate_evaluate(
        &self,
        _round: u64,
        results: &[(WorkerHandle, EvaluateRes)],
        _failures: &[Failure<EvaluateRes>],
    ) -> (Option<f64>, Metrics) {
        let examples: u64 = results.iter().map(|(_, r)| r.num_examples).sum();
        if examples == 0 {
            return (None, Metrics::new());
        }

        let loss = results
            .iter()
            .map(|(_, r)| r.loss * r.num_examples as f64)
            .sum::<f64>()
            / examples as f64;

        let metrics = weighted_metrics(results.iter().map(|(_, r)| (&r.metrics, r.num_examples)));
        (Some(loss), metrics)
    }

    fn evaluate(&self, _round: u64, _parameters: &Parameters) -> Option<(f64, Metrics)> {
        None
    }

    fn min_available(&self) -> usize {
        self.config.min_available_workers
    }

    fn update_quota(&mut self, active: usize) {
        self.config.min_fit_workers = active;
        self.config.min_evaluate_workers = active;
        self.config.min_available_workers = active;
    }
}

/// Averages tensors weighted by example count, skipping updates shaped unlike the first one.
fn weighted_average(updates: impl Iterator<Item = (Vec<Vec<f32>>, u64)>) -> Option<Vec<Vec<f32>>> {
    let mut acc: Option<Vec<Vec<f64>>> = None;
    let mut total = 0u64;

    for (tensors, examples) in updates {
        let acc = acc.get_or_insert_with(|| {
            tensors.iter().map(|t| vec![0.0; t.len()]).collect()
        });

        let same_shape = acc.len() == tensors.len()
            && acc.iter().zip(&tensors).all(|(a, t)| a.len() == t.len());

        if !same_shape {
            warn!("skipping an update whose shape doesn't match the others");
            continue;
        }

        for (a, t) in acc.iter_mut().zip(&tensors) {
            for (a, &v) in a.iter_mut().zip(t) {
                *a += v as f64 * examples as f64;
            }
        }

        total += examples;
    }

    if total == 0 {
        return None;
    }

    let avg = acc?
        .into_iter()
        .map(|t| t.into_iter().map(|v| (v / total as f64) as f32).collect())
        .collect();

    Some(avg)
}

/// Averages every numeric metric weighted by example count, other metrics are dropped.
fn weighted_metrics<'a>(reports: impl Iterator<Item = (&'a Metrics, u64)>) -> Metrics {
    let mut sums: HashMap<String, (f64, u64)> = HashMap::new();

    for (metrics, examples) in reports {
        for (name, value) in metrics {
            if let Some(v) = value.as_f64() {
                let (sum, total) = sums.entry(name.clone()).or_default();
                *sum += v * examples as f64;
                *total += examples;
            }
        }
    }

    sums.into_iter()
        .filter(|&(_, (_, total))| total > 0)
        .map(|(name, (sum, total))| (name, Scalar::Float(sum / total as f64)))
        .collect()
}
