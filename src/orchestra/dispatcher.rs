use std::{
    collections::{HashMap, HashSet},
    fmt, io,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use comms::specs::Reply;
use log::warn;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::orchestra::{
    error::{OrchestratorError, Result},
    worker::{Operation, WorkerHandle},
};

/// A call that didn't produce a usable reply.
pub enum Failure<R> {
    /// The call itself failed: a connection error, a timeout or a crashed task.
    Transport { worker: WorkerHandle, error: io::Error },
    /// The worker answered, but with a non ok status.
    Application { worker: WorkerHandle, reply: R },
}

impl<R> Failure<R> {
    /// The worker this failure belongs to.
    pub fn worker(&self) -> &WorkerHandle {
        match self {
            Failure::Transport { worker, .. } | Failure::Application { worker, .. } => worker,
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Failure<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Transport { worker, error } => f
                .debug_struct("Transport")
                .field("worker", worker.id())
                .field("error", error)
                .finish(),
            Failure::Application { worker, reply } => f
                .debug_struct("Application")
                .field("worker", worker.id())
                .field("reply", reply)
                .finish(),
        }
    }
}

/// Everything a dispatch batch produced, in completion order.
pub struct Batch<R> {
    pub results: Vec<(WorkerHandle, R)>,
    pub failures: Vec<Failure<R>>,
}

impl<R> Batch<R> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            failures: Vec::new(),
        }
    }

    /// The amount of calls this batch accounts for.
    pub fn len(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fans a batch of calls out to workers and gathers every outcome back.
///
/// The amount of calls running at once is bounded by a semaphore the dispatcher owns
/// for its whole lifetime, so every batch shares the same limit.
#[derive(Clone)]
pub struct Dispatcher {
    permits: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    /// Creates a new `Dispatcher`.
    ///
    /// # Arguments
    /// * `max_concurrency` - How many calls may run at once, unbounded if `None`.
    pub fn new(max_concurrency: Option<NonZeroUsize>) -> Self {
        Self {
            permits: max_concurrency.map(|n| Arc::new(Semaphore::new(n.get()))),
        }
    }

    /// Runs `op` for every `(worker, instruction)` pair and waits for all of them.
    ///
    /// Never returns early and never fails because of a worker. Timeouts are left to
    /// `op` itself.
    ///
    /// # Arguments
    /// * `pairs` - The workers to call and what to send to each one.
    /// * `op` - The capability to invoke.
    /// * `timeout` - The per-call timeout handed to `op`.
    ///
    /// # Returns
    /// The batch's results and failures, or `DuplicateWorker` if a worker appears twice in `pairs`.
    pub async fn dispatch<I, R>(
        &self,
        pairs: Vec<(WorkerHandle, I)>,
        op: Operation<I, R>,
        timeout: Option<Duration>,
    ) -> Result<Batch<R>>
    where
        I: Send + 'static,
        R: Reply + Send + 'static,
    {
        let mut seen = HashSet::with_capacity(pairs.len());
        if let Some((worker, _)) = pairs.iter().find(|(w, _)| !seen.insert(w.id().clone())) {
            return Err(OrchestratorError::DuplicateWorker(worker.id().clone()));
        }

        let mut batch = Batch::with_capacity(pairs.len());
        let mut in_flight = HashMap::with_capacity(pairs.len());
        let mut tasks = JoinSet::new();

        for (worker, ins) in pairs {
            let permits = self.permits.clone();
            let call = op(Arc::clone(&worker), ins, timeout);

            let handle = tasks.spawn(async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };

                call.await
            });

            in_flight.insert(handle.id(), worker);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(io::Error::other(e))),
            };

            let Some(worker) = in_flight.remove(&id) else {
                warn!("finished call {id} doesn't belong to this batch");
                continue;
            };

            match outcome {
                Ok(reply) if reply.status().is_ok() => batch.results.push((worker, reply)),
                Ok(reply) => {
                    warn!(
                        worker_id = worker.id().as_str();
                        "call answered with {:?}: {}", reply.status().code, reply.status().message
                    );
                    batch.failures.push(Failure::Application { worker, reply });
                }
                Err(error) => {
                    warn!(worker_id = worker.id().as_str(); "call failed: {error}");
                    batch.failures.push(Failure::Transport { worker, error });
                }
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use comms::specs::{Code, FitIns, Parameters};

    use super::*;
    use crate::orchestra::{testing::FakeWorker, worker};

    fn fit_pairs(workers: Vec<FakeWorker>) -> Vec<(WorkerHandle, FitIns)> {
        workers
            .into_iter()
            .map(|w| {
                let ins = FitIns {
                    parameters: Parameters::default(),
                    config: Default::default(),
                };
                (Arc::new(w) as WorkerHandle, ins)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_transport_error_lands_in_failures() {
        let pairs = fit_pairs(vec![
            FakeWorker::new("a"),
            FakeWorker::new("b").failing_fit(),
            FakeWorker::new("c"),
        ]);

        let batch = Dispatcher::new(None)
            .dispatch(pairs, worker::fit, None)
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert!(matches!(
            &batch.failures[0],
            Failure::Transport { worker, .. } if worker.id().as_str() == "b"
        ));
    }

    #[tokio::test]
    async fn test_non_ok_status_is_an_application_failure() {
        let pairs = fit_pairs(vec![
            FakeWorker::new("a").with_fit_code(Code::FitNotImplemented),
            FakeWorker::new("b"),
        ]);

        let batch = Dispatcher::new(None)
            .dispatch(pairs, worker::fit, None)
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.results.iter().all(|(_, r)| r.status.is_ok()));
        assert!(matches!(
            &batch.failures[0],
            Failure::Application { reply, .. } if !reply.status.is_ok()
        ));
    }

    #[tokio::test]
    async fn test_every_call_is_accounted_for() {
        let workers = (0..12)
            .map(|i| {
                let w = FakeWorker::new(format!("w{i}"));
                match i % 3 {
                    0 => w.failing_fit(),
                    1 => w.with_fit_code(Code::Failed),
                    _ => w,
                }
            })
            .collect();

        let batch = Dispatcher::new(NonZeroUsize::new(4))
            .dispatch(fit_pairs(workers), worker::fit, None)
            .await
            .unwrap();

        assert_eq!(batch.len(), 12);
        assert_eq!(batch.results.len(), 4);
        assert_eq!(batch.failures.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers = (0..8)
            .map(|i| {
                FakeWorker::new(format!("w{i}"))
                    .with_delay(Duration::from_millis(20))
                    .tracking(Arc::clone(&running), Arc::clone(&peak))
            })
            .collect();

        let batch = Dispatcher::new(NonZeroUsize::new(2))
            .dispatch(fit_pairs(workers), worker::fit, None)
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_call_is_a_transport_failure() {
        let pairs = fit_pairs(vec![FakeWorker::new("a").panicking(), FakeWorker::new("b")]);

        let batch = Dispatcher::new(None)
            .dispatch(pairs, worker::fit, None)
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.failures[0].worker().id().as_str(), "a");
    }

    #[tokio::test]
    async fn test_duplicate_worker_is_rejected() {
        let handle: WorkerHandle = Arc::new(FakeWorker::new("a"));
        let ins = FitIns {
            parameters: Parameters::default(),
            config: Default::default(),
        };
        let pairs = vec![(handle.clone(), ins.clone()), (handle, ins)];

        let res = Dispatcher::new(None).dispatch(pairs, worker::fit, None).await;
        assert!(matches!(res, Err(OrchestratorError::DuplicateWorker(id)) if id.as_str() == "a"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let batch = Dispatcher::new(None)
            .dispatch(fit_pairs(Vec::new()), worker::fit, None)
            .await
            .unwrap();

        assert!(batch.is_empty());
    }
}
