use std::time::Duration;

use comms::specs::{ContributionsIns, EvaluateIns, Parameters, Reply};
use log::{debug, error, info, warn};

use crate::orchestra::{
    dispatcher::{Batch, Dispatcher, Failure},
    error::{OrchestratorError, Result},
    registry::WorkerRegistry,
    worker::{self, WorkerHandle, WorkerId},
};

/// The contribution score of every worker that submitted a vector, in submission order.
#[derive(Default)]
pub struct Contributions {
    scores: Vec<(WorkerHandle, f64)>,
}

impl Contributions {
    /// The score of a worker, if it was part of the submission.
    pub fn get(&self, id: &WorkerId) -> Option<f64> {
        self.scores
            .iter()
            .find(|(w, _)| w.id() == id)
            .map(|&(_, score)| score)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&WorkerHandle, f64)> {
        self.scores.iter().map(|(w, score)| (w, *score))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Gathers contribution vectors from the workers and has the coordinator score them.
pub struct ReputationEngine {
    dispatcher: Dispatcher,
    timeout: Option<Duration>,
}

impl ReputationEngine {
    /// Creates a new `ReputationEngine`.
    ///
    /// # Arguments
    /// * `dispatcher` - The dispatcher shared with the orchestrator.
    /// * `timeout` - The per-call timeout for every remote call.
    pub fn new(dispatcher: Dispatcher, timeout: Option<Duration>) -> Self {
        Self {
            dispatcher,
            timeout,
        }
    }

    /// Hands the current global parameters to the coordinator so it scores against them.
    ///
    /// # Returns
    /// `CoordinatorUnavailable` if there's no coordinator or it didn't take the parameters.
    pub async fn sync_coordinator(
        &self,
        round: u64,
        registry: &WorkerRegistry,
        parameters: &Parameters,
    ) -> Result<()> {
        let coordinator = Self::coordinator(round, registry)?;
        let ins = EvaluateIns {
            parameters: parameters.clone(),
            config: Default::default(),
        };

        let batch = self
            .dispatcher
            .dispatch(vec![(coordinator, ins)], worker::evaluate, self.timeout)
            .await?;

        Self::single_reply(round, batch).map(|_| ())
    }

    /// Computes the contribution score of every active or waiting worker.
    ///
    /// Workers that fail to submit a vector are left out of the result. The coordinator
    /// answers a bare sequence of scores, so submission order is kept end to end and
    /// scores are matched to workers by position.
    ///
    /// # Arguments
    /// * `round` - The current round.
    /// * `registry` - Where the workers and the coordinator are taken from.
    ///
    /// # Returns
    /// The scores or `CoordinatorUnavailable` if the coordinator couldn't score the vectors.
    pub async fn compute_contribution(
        &self,
        round: u64,
        registry: &WorkerRegistry,
    ) -> Result<Contributions> {
        let mut workers = registry.active();
        workers.extend(registry.waiting());

        let pairs = workers.into_iter().map(|w| (w, ())).collect();
        let batch = self
            .dispatcher
            .dispatch(pairs, worker::get_gradients, self.timeout)
            .await?;

        debug!(
            "gradients {round} received {} results and {} failures",
            batch.results.len(),
            batch.failures.len()
        );

        if batch.results.is_empty() {
            warn!("round {round}: no worker submitted a contribution vector");
            return Ok(Contributions::default());
        }

        let (order, gradients): (Vec<_>, Vec<_>) = batch
            .results
            .into_iter()
            .map(|(w, res)| (w, res.gradients))
            .unzip();

        let coordinator = Self::coordinator(round, registry)?;
        let ins = ContributionsIns { gradients };
        let batch = self
            .dispatcher
            .dispatch(vec![(coordinator, ins)], worker::get_contributions, self.timeout)
            .await?;

        let scores = Self::single_reply(round, batch)?.scores;

        if scores.len() != order.len() {
            let reason = format!(
                "returned {} scores for {} contribution vectors",
                scores.len(),
                order.len()
            );
            error!("round {round}: coordinator {reason}");
            return Err(OrchestratorError::CoordinatorUnavailable { round, reason });
        }

        info!("round {round}: scored {} workers", scores.len());
        let scores = order.into_iter().zip(scores).collect();
        Ok(Contributions { scores })
    }

    fn coordinator(round: u64, registry: &WorkerRegistry) -> Result<WorkerHandle> {
        registry.coordinator().ok_or_else(|| {
            error!("round {round}: no coordinator registered");
            OrchestratorError::CoordinatorUnavailable {
                round,
                reason: "no coordinator registered".into(),
            }
        })
    }

    fn single_reply<R: Reply>(round: u64, mut batch: Batch<R>) -> Result<R> {
        if let Some((_, reply)) = batch.results.pop() {
            return Ok(reply);
        }

        let reason = match batch.failures.pop() {
            Some(Failure::Transport { error, .. }) => error.to_string(),
            Some(Failure::Application { reply, .. }) => format!(
                "answered {:?}: {}",
                reply.status().code,
                reply.status().message
            ),
            None => "no reply".into(),
        };

        error!("round {round}: coordinator call failed: {reason}");
        Err(OrchestratorError::CoordinatorUnavailable { round, reason })
    }
}
