use std::{collections::HashMap, sync::Arc, time::Duration};

use comms::specs::{
    EvaluateRes, FitRes, GetParametersIns, Metrics, Parameters, ReconnectIns, Role,
};
use log::{debug, info, warn};
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    orchestra::{
        audit::{CampaignObserver, NoopObserver},
        dispatcher::{Batch, Dispatcher},
        error::Result,
        history::History,
        membership::MembershipPolicy,
        registry::{MembershipState, WorkerRegistry},
        reputation::ReputationEngine,
        worker::{self, WorkerId},
    },
    strategy::Strategy,
};

/// Where the campaign currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStage {
    Init,
    IdentifyCoordinator,
    Fit,
    Reputation,
    Evaluate,
    Done,
}

/// What a fit round produced.
pub struct FitRound {
    /// The aggregated parameters, `None` if the strategy produced none.
    pub parameters: Option<Parameters>,
    pub metrics: Metrics,
    /// The round's batch, with results filtered down to the workers still active.
    pub batch: Batch<FitRes>,
}

/// What an evaluation round produced.
pub struct EvaluateRound {
    pub loss: Option<f64>,
    pub metrics: Metrics,
    pub batch: Batch<EvaluateRes>,
}

/// Sequences a campaign's rounds: selection, dispatch, reputation, membership and aggregation.
///
/// Rounds never overlap and the registry is only mutated once a round's batch has
/// fully drained.
pub struct RoundOrchestrator {
    registry: Arc<WorkerRegistry>,
    strategy: Box<dyn Strategy>,
    dispatcher: Dispatcher,
    reputation: ReputationEngine,
    policy: MembershipPolicy,
    observer: Arc<dyn CampaignObserver>,
    parameters: Parameters,
    active: usize,
    indices: HashMap<WorkerId, usize>,
    stage: watch::Sender<CampaignStage>,
    timeout: Option<Duration>,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl RoundOrchestrator {
    /// Creates a new `RoundOrchestrator`.
    ///
    /// # Arguments
    /// * `registry` - The registry workers get registered into.
    /// * `strategy` - The selection and aggregation policy.
    /// * `policy` - The membership policy applied after every reputation step.
    /// * `dispatcher` - The dispatcher every remote call goes through.
    /// * `timeout` - The per-call timeout for every remote call.
    ///
    /// # Returns
    /// A new `RoundOrchestrator` instance.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        strategy: Box<dyn Strategy>,
        policy: MembershipPolicy,
        dispatcher: Dispatcher,
        timeout: Option<Duration>,
    ) -> Self {
        let (stage, _) = watch::channel(CampaignStage::Init);
        let active = strategy.min_available();

        Self {
            reputation: ReputationEngine::new(dispatcher.clone(), timeout),
            registry,
            strategy,
            dispatcher,
            policy,
            observer: Arc::new(NoopObserver),
            parameters: Parameters::default(),
            active,
            indices: HashMap::new(),
            stage,
            timeout,
            wait_timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets where the campaign's audit events go.
    pub fn with_observer(mut self, observer: Arc<dyn CampaignObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets how long to wait for workers to connect before identification.
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Sets the token that stops the campaign between rounds.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribes to the campaign's stage changes.
    pub fn stages(&self) -> watch::Receiver<CampaignStage> {
        self.stage.subscribe()
    }

    /// The current global parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The active quota the strategy is currently sampling with.
    pub fn active(&self) -> usize {
        self.active
    }

    /// The reporting index assigned to a worker, if it has one.
    pub fn index(&self, id: &WorkerId) -> Option<usize> {
        self.indices.get(id).copied()
    }

    /// Runs the whole campaign.
    ///
    /// Round 0 only evaluates the initial parameters, rounds `1..=num_rounds` fit, evaluate
    /// on the orchestrator's side and then evaluate on the workers.
    ///
    /// # Arguments
    /// * `num_rounds` - The amount of training rounds.
    ///
    /// # Returns
    /// The campaign's history, or `CoordinatorUnavailable` if a reputation step couldn't be scored.
    pub async fn run(&mut self, num_rounds: u64) -> Result<History> {
        let mut history = History::new();

        self.identify_coordinator().await?;

        self.observer.campaign_started(num_rounds, self.active);
        self.observer.methodology(&self.policy.methodology().to_string());
        self.observer.threshold(self.policy.threshold());

        info!("initializing global parameters");
        self.parameters = self.initial_parameters().await?;

        info!("evaluating initial parameters");
        self.evaluate_centralized(0, &mut history);
        self.evaluate_distributed(0, &mut history).await?;

        info!("campaign starting");
        let start = Instant::now();

        for round in 1..=num_rounds {
            if self.cancel.is_cancelled() {
                info!("campaign cancelled before round {round}");
                break;
            }

            if let Some(fit) = self.fit_round(round).await? {
                history.add_metrics_distributed_fit(round, &fit.metrics);
            }

            if let Some((loss, _)) = self.evaluate_centralized(round, &mut history) {
                info!(
                    "fit progress: round {round}, loss {loss}, {:?} elapsed",
                    start.elapsed()
                );
            }

            self.evaluate_distributed(round, &mut history).await?;
        }

        info!("campaign finished in {:?}", start.elapsed());
        self.set_stage(CampaignStage::Done);
        Ok(history)
    }

    /// Finds the coordinator among a sample of waiting workers and admits the rest.
    ///
    /// Samples one more worker than the strategy's minimum, the first one claiming the
    /// coordinator role is registered as such and every other responder becomes active.
    pub async fn identify_coordinator(&mut self) -> Result<()> {
        self.set_stage(CampaignStage::IdentifyCoordinator);
        info!("identifying the coordinator");

        let wanted = self.strategy.min_available() + 1;
        if !self.registry.wait_for(wanted, self.wait_timeout).await {
            warn!("only {} workers connected", self.registry.waiting().len());
        }

        let pairs = self
            .registry
            .sample_waiting(wanted, wanted)
            .into_iter()
            .map(|w| (w, ()))
            .collect();

        let batch = self
            .dispatcher
            .dispatch(pairs, worker::identify, self.timeout)
            .await?;

        for (worker, res) in batch.results {
            match res.role {
                Role::Coordinator if self.registry.register_coordinator(worker.clone()) => {
                    info!(worker_id = worker.id().as_str(); "registered the coordinator");
                }
                Role::Coordinator => {
                    warn!(worker_id = worker.id().as_str(); "extra coordinator stays waiting");
                }
                Role::Participant => {
                    self.registry.reregister(worker.id());
                }
            }
        }

        self.prune_disconnected();
        if self.registry.coordinator().is_none() {
            warn!("no worker claimed the coordinator role");
        }

        for worker in self.registry.active() {
            self.index_of(worker.id());
        }

        self.publish_quota();
        Ok(())
    }

    /// Runs a single fit round followed by its reputation step.
    ///
    /// # Returns
    /// `None` if the strategy selected no workers, the round's outcome otherwise.
    pub async fn fit_round(&mut self, round: u64) -> Result<Option<FitRound>> {
        self.set_stage(CampaignStage::Fit);

        let selection = self
            .strategy
            .configure_fit(round, &self.parameters, &self.registry);

        if selection.is_empty() {
            info!("fit round {round}: no workers selected, skipping");
            return Ok(None);
        }

        debug!(
            "fit round {round}: strategy sampled {} workers (out of {})",
            selection.len(),
            self.registry.num_available()
        );

        let mut batch = self
            .dispatcher
            .dispatch(selection, worker::fit, self.timeout)
            .await?;

        debug!(
            "fit round {round} received {} results and {} failures",
            batch.results.len(),
            batch.failures.len()
        );

        let dropped = self.prune_disconnected();
        let mutated = self.reputation_round(round).await?;

        if dropped | mutated | self.prune_disconnected() {
            let registry = &self.registry;
            batch
                .results
                .retain(|(w, _)| registry.state(w.id()) == Some(MembershipState::Active));
        }

        let (parameters, metrics) =
            self.strategy
                .aggregate_fit(self.active, round, &batch.results, &batch.failures);

        if let Some(parameters) = parameters.as_ref().filter(|p| !p.is_empty()) {
            self.parameters = parameters.clone();
        }

        Ok(Some(FitRound {
            parameters,
            metrics,
            batch,
        }))
    }

    /// Runs a single evaluation round on the workers.
    ///
    /// # Returns
    /// `None` if the strategy selected no workers, the aggregated loss and metrics otherwise.
    pub async fn evaluate_round(&mut self, round: u64) -> Result<Option<EvaluateRound>> {
        self.set_stage(CampaignStage::Evaluate);

        let selection = self
            .strategy
            .configure_evaluate(round, &self.parameters, &self.registry);

        if selection.is_empty() {
            info!("evaluate round {round}: no workers selected, skipping");
            return Ok(None);
        }

        debug!(
            "evaluate round {round}: strategy sampled {} workers (out of {})",
            selection.len(),
            self.registry.num_available()
        );

        let batch = self
            .dispatcher
            .dispatch(selection, worker::evaluate, self.timeout)
            .await?;

        debug!(
            "evaluate round {round} received {} results and {} failures",
            batch.results.len(),
            batch.failures.len()
        );

        self.prune_disconnected();

        let (loss, metrics) =
            self.strategy
                .aggregate_evaluate(round, &batch.results, &batch.failures);

        Ok(Some(EvaluateRound {
            loss,
            metrics,
            batch,
        }))
    }

    /// Tells every registered worker to disconnect, the coordinator included.
    ///
    /// Workers that acknowledge are unregistered.
    pub async fn disconnect_all(&self, timeout: Option<Duration>) -> Result<()> {
        let pairs = self
            .registry
            .all()
            .into_values()
            .map(|w| (w, ReconnectIns::default()))
            .collect();

        let batch = self
            .dispatcher
            .dispatch(pairs, worker::reconnect, timeout)
            .await?;

        for (worker, _) in &batch.results {
            self.registry.unregister(worker.id());
        }

        info!(
            "disconnected {} workers, {} failed",
            batch.results.len(),
            batch.failures.len()
        );

        Ok(())
    }

    /// Scores the workers and applies the membership policy.
    ///
    /// # Returns
    /// Whether the registry changed.
    async fn reputation_round(&mut self, round: u64) -> Result<bool> {
        self.set_stage(CampaignStage::Reputation);

        self.reputation
            .sync_coordinator(round, &self.registry, &self.parameters)
            .await?;

        let scores = self
            .reputation
            .compute_contribution(round, &self.registry)
            .await?;

        let indexed: Vec<_> = scores
            .iter()
            .map(|(w, score)| (self.index_of(w.id()), score))
            .collect();

        info!("contribution scores round {round}: {indexed:?}");
        self.observer.scores(round, &indexed);

        let change = self.policy.eliminate(&self.registry, &scores);
        if change.mutated {
            self.publish_quota();
        }

        Ok(change.mutated)
    }

    async fn initial_parameters(&self) -> Result<Parameters> {
        if let Some(parameters) = self.strategy.initialize_parameters(&self.registry) {
            info!("using initial parameters provided by the strategy");
            return Ok(parameters);
        }

        info!("requesting initial parameters from one random worker");
        let pairs = self
            .registry
            .sample(1, 1)
            .into_iter()
            .map(|w| (w, GetParametersIns::default()))
            .collect();

        let batch = self
            .dispatcher
            .dispatch(pairs, worker::get_parameters, self.timeout)
            .await?;

        match batch.results.into_iter().next() {
            Some((worker, res)) => {
                info!(worker_id = worker.id().as_str(); "received initial parameters");
                Ok(res.parameters)
            }
            None => {
                warn!("no initial parameters received, starting from empty parameters");
                Ok(Parameters::default())
            }
        }
    }

    fn evaluate_centralized(&self, round: u64, history: &mut History) -> Option<(f64, Metrics)> {
        let (loss, metrics) = self.strategy.evaluate(round, &self.parameters)?;

        history.add_loss_centralized(round, loss);
        history.add_metrics_centralized(round, &metrics);
        Some((loss, metrics))
    }

    async fn evaluate_distributed(&mut self, round: u64, history: &mut History) -> Result<()> {
        let Some(EvaluateRound {
            loss: Some(loss),
            metrics,
            ..
        }) = self.evaluate_round(round).await?
        else {
            return Ok(());
        };

        history.add_loss_distributed(round, loss);
        history.add_metrics_distributed(round, &metrics);
        Ok(())
    }

    /// Unregisters every worker whose connection was lost during the last batch.
    ///
    /// # Returns
    /// Whether any worker was removed.
    fn prune_disconnected(&mut self) -> bool {
        let lost: Vec<_> = self
            .registry
            .all()
            .into_values()
            .filter(|w| !w.is_connected())
            .collect();

        if lost.is_empty() {
            return false;
        }

        for worker in &lost {
            warn!(worker_id = worker.id().as_str(); "connection lost, unregistering");
            self.registry.unregister(worker.id());
        }

        self.publish_quota();
        true
    }

    fn publish_quota(&mut self) {
        self.active = self.registry.num_available();
        self.strategy.update_quota(self.active);
        debug!("active quota is now {}", self.active);
    }

    fn index_of(&mut self, id: &WorkerId) -> usize {
        let next = self.indices.len();
        *self.indices.entry(id.clone()).or_insert(next)
    }

    fn set_stage(&self, stage: CampaignStage) {
        debug!("campaign stage {stage:?}");
        self.stage.send_replace(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::FedAvgConfig,
        orchestra::{
            membership::Methodology,
            testing::{FakeWorker, Scoring},
            worker::WorkerHandle,
        },
        strategy::FedAvg,
    };

    fn orchestrator(
        workers: Vec<FakeWorker>,
        min_available: usize,
        methodology: Methodology,
    ) -> RoundOrchestrator {
        let registry = Arc::new(WorkerRegistry::new());
        for w in workers {
            registry.register(Arc::new(w) as WorkerHandle);
        }

        let strategy = FedAvg::new(FedAvgConfig {
            min_fit_workers: min_available,
            min_evaluate_workers: min_available,
            min_available_workers: min_available,
            ..Default::default()
        })
        .with_initial_parameters(Parameters::from_f32(&[vec![1.0]]));

        RoundOrchestrator::new(
            registry,
            Box::new(strategy),
            MembershipPolicy::new(methodology, 0.1),
            Dispatcher::new(None),
            None,
        )
        .with_wait_timeout(Duration::from_millis(50))
    }

    fn scored(id: &str, score: f32) -> FakeWorker {
        FakeWorker::new(id).with_gradient(vec![score])
    }

    fn coordinator() -> FakeWorker {
        FakeWorker::new("coord").coordinator(Scoring::FirstValue)
    }

    #[tokio::test]
    async fn test_identification_admits_participants() {
        let mut orch = orchestrator(
            vec![scored("a", 0.5), coordinator(), scored("b", 0.5), scored("c", 0.5)],
            3,
            Methodology::DeleteOne,
        );

        orch.identify_coordinator().await.unwrap();

        assert_eq!(orch.registry.coordinator().unwrap().id().as_str(), "coord");
        assert_eq!(orch.registry.num_available(), 3);
        assert_eq!(orch.active(), 3);
        assert_eq!(orch.index(&"coord".into()), None);

        let mut indices: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| orch.index(&(*id).into()).unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_empty_selection_skips_the_round() {
        let mut orch = orchestrator(vec![scored("a", 0.5)], 3, Methodology::DeleteOne);
        orch.parameters = Parameters::from_f32(&[vec![2.0]]);

        let res = orch.fit_round(1).await.unwrap();

        assert!(res.is_none());
        assert_eq!(orch.parameters().to_f32(), Some(vec![vec![2.0]]));
        assert_eq!(orch.registry.state(&"a".into()), Some(MembershipState::Waiting));
    }

    #[tokio::test]
    async fn test_empty_evaluation_selection_skips_the_round() {
        let mut orch = orchestrator(vec![scored("a", 0.5)], 3, Methodology::DeleteOne);
        orch.parameters = Parameters::from_f32(&[vec![2.0]]);

        let res = orch.evaluate_round(1).await.unwrap();

        assert!(res.is_none());
        assert_eq!(orch.parameters().to_f32(), Some(vec![vec![2.0]]));
        assert_eq!(orch.registry.state(&"a".into()), Some(MembershipState::Waiting));
        assert_eq!(orch.registry.num_available(), 0);
    }

    #[tokio::test]
    async fn test_fit_round_drops_eliminated_results() {
        let mut orch = orchestrator(
            vec![
                scored("a", 0.05),
                scored("b", 0.2),
                scored("c", 0.3),
                scored("d", 0.4),
                coordinator(),
            ],
            4,
            Methodology::DeleteOne,
        );

        orch.identify_coordinator().await.unwrap();
        orch.parameters = Parameters::from_f32(&[vec![1.0]]);

        let fit = orch.fit_round(1).await.unwrap().unwrap();

        assert_eq!(
            orch.registry.state(&"a".into()),
            Some(MembershipState::Eliminated)
        );
        assert_eq!(fit.batch.results.len(), 3);
        assert!(fit.batch.results.iter().all(|(w, _)| w.id().as_str() != "a"));
        assert_eq!(orch.active(), 3);
        assert_eq!(orch.active(), orch.registry.num_available());
        assert_eq!(orch.parameters().to_f32(), Some(vec![vec![1.0]]));
    }

    #[tokio::test]
    async fn test_stages_are_published() {
        let mut orch = orchestrator(
            vec![scored("a", 0.5), scored("b", 0.5), coordinator()],
            2,
            Methodology::DeleteOne,
        );
        let stages = orch.stages();

        orch.run(1).await.unwrap();
        assert_eq!(*stages.borrow(), CampaignStage::Done);
    }

    #[tokio::test]
    async fn test_cancelled_campaign_stops_between_rounds() {
        let cancel = CancellationToken::new();
        let mut orch = orchestrator(
            vec![scored("a", 0.5), scored("b", 0.5), coordinator()],
            2,
            Methodology::DeleteOne,
        )
        .with_cancellation(cancel.clone());

        cancel.cancel();
        let history = orch.run(5).await.unwrap();

        assert_eq!(history.rounds(), vec![0]);
        assert!(history.metrics_distributed_fit.is_empty());
    }
}
