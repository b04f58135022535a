use std::{fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use comms::specs::{
    ContributionsIns, ContributionsRes, DisconnectRes, EvaluateIns, EvaluateRes, FitIns, FitRes,
    GetParametersIns, GetParametersRes, GradientsRes, IdentifyRes, ReconnectIns,
};
use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};

/// The opaque identity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a new `WorkerId`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A remote participant and the capabilities the orchestrator may invoke on it.
///
/// Every method takes an optional per-call timeout, enforcing it is the implementor's
/// job. A returned `Err` is a transport failure, a reply with a non ok status is an
/// application failure.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The identity of this worker.
    fn id(&self) -> &WorkerId;

    /// False once the worker's connection is gone for good.
    fn is_connected(&self) -> bool {
        true
    }

    /// Trains on the given parameters.
    async fn fit(&self, ins: FitIns, timeout: Option<Duration>) -> io::Result<FitRes>;

    /// Evaluates the given parameters on the worker's local data.
    async fn evaluate(&self, ins: EvaluateIns, timeout: Option<Duration>)
    -> io::Result<EvaluateRes>;

    /// Returns the worker's current local parameters.
    async fn get_parameters(
        &self,
        ins: GetParametersIns,
        timeout: Option<Duration>,
    ) -> io::Result<GetParametersRes>;

    /// Returns the worker's contribution vector for the last round.
    async fn get_gradients(&self, timeout: Option<Duration>) -> io::Result<GradientsRes>;

    /// Scores an ordered sequence of contribution vectors, only the coordinator implements it.
    async fn get_contributions(
        &self,
        ins: ContributionsIns,
        timeout: Option<Duration>,
    ) -> io::Result<ContributionsRes>;

    /// Tells the worker to disconnect.
    async fn reconnect(
        &self,
        ins: ReconnectIns,
        timeout: Option<Duration>,
    ) -> io::Result<DisconnectRes>;

    /// Asks the worker which role it plays in the campaign.
    async fn identify(&self, timeout: Option<Duration>) -> io::Result<IdentifyRes>;
}

/// A shared handle to a worker.
pub type WorkerHandle = Arc<dyn Worker>;

/// A single remote call ready to be spawned by the `Dispatcher`.
pub type Call<R> = BoxFuture<'static, io::Result<R>>;

/// A capability invocation: which worker, which instruction and how long to wait.
pub type Operation<I, R> = fn(WorkerHandle, I, Option<Duration>) -> Call<R>;

pub fn fit(worker: WorkerHandle, ins: FitIns, timeout: Option<Duration>) -> Call<FitRes> {
    async move { worker.fit(ins, timeout).await }.boxed()
}

pub fn evaluate(
    worker: WorkerHandle,
    ins: EvaluateIns,
    timeout: Option<Duration>,
) -> Call<EvaluateRes> {
    async move { worker.evaluate(ins, timeout).await }.boxed()
}

pub fn get_parameters(
    worker: WorkerHandle,
    ins: GetParametersIns,
    timeout: Option<Duration>,
) -> Call<GetParametersRes> {
    async move { worker.get_parameters(ins, timeout).await }.boxed()
}

pub fn get_gradients(worker: WorkerHandle, _: (), timeout: Option<Duration>) -> Call<GradientsRes> {
    async move { worker.get_gradients(timeout).await }.boxed()
}

pub fn get_contributions(
    worker: WorkerHandle,
    ins: ContributionsIns,
    timeout: Option<Duration>,
) -> Call<ContributionsRes> {
    async move { worker.get_contributions(ins, timeout).await }.boxed()
}

pub fn reconnect(
    worker: WorkerHandle,
    ins: ReconnectIns,
    timeout: Option<Duration>,
) -> Call<DisconnectRes> {
    async move { worker.reconnect(ins, timeout).await }.boxed()
}

pub fn identify(worker: WorkerHandle, _: (), timeout: Option<Duration>) -> Call<IdentifyRes> {
    async move { worker.identify(timeout).await }.boxed()
}
