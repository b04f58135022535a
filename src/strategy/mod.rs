mod fedavg;

use comms::specs::{EvaluateIns, EvaluateRes, FitIns, FitRes, Metrics, Parameters};

use crate::orchestra::{dispatcher::Failure, registry::WorkerRegistry, worker::WorkerHandle};

pub use fedavg::FedAvg;

/// The workers picked for a round and the instruction each one receives.
pub type Selection<I> = Vec<(WorkerHandle, I)>;

/// The pluggable policy that selects workers and combines their results.
///
/// The orchestrator only sequences rounds, every numerical decision lives behind
/// this trait.
pub trait Strategy: Send {
    /// Provides the campaign's initial parameters, if the strategy has them.
    fn initialize_parameters(&self, registry: &WorkerRegistry) -> Option<Parameters>;

    /// Selects the workers to train in `round`.
    ///
    /// # Returns
    /// The selection, empty if the round should be skipped.
    fn configure_fit(
        &self,
        round: u64,
        parameters: &Parameters,
        registry: &WorkerRegistry,
    ) -> Selection<FitIns>;

    /// Selects the workers to evaluate in `round`.
    ///
    /// # Returns
    /// The selection, empty if the round should be skipped.
    fn configure_evaluate(
        &self,
        round: u64,
        parameters: &Parameters,
        registry: &WorkerRegistry,
    ) -> Selection<EvaluateIns>;

    /// Combines a fit round's results.
    ///
    /// # Arguments
    /// * `active` - The current amount of active workers.
    /// * `round` - The round being aggregated.
    /// * `results` - The successful replies.
    /// * `failures` - The failed calls.
    ///
    /// # Returns
    /// The new global parameters, if any, and the aggregated fit metrics.
    fn aggregate_fit(
        &self,
        active: usize,
        round: u64,
        results: &[(WorkerHandle, FitRes)],
        failures: &[Failure<FitRes>],
    ) -> (Option<Parameters>, Metrics);

    /// Combines an evaluation round's results into a loss and metrics.
    fn aggregate_evaluate(
        &self,
        round: u64,
        results: &[(WorkerHandle, EvaluateRes)],
        failures: &[Failure<EvaluateRes>],
    ) -> (Option<f64>, Metrics);

    /// Evaluates the global parameters on the orchestrator's side.
    fn evaluate(&self, round: u64, parameters: &Parameters) -> Option<(f64, Metrics)>;

    /// The minimum amount of active workers the strategy needs.
    fn min_available(&self) -> usize;

    /// Publishes the current active population as the strategy's selection quota.
    fn update_quota(&mut self, active: usize);
}
