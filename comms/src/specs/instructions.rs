use serde::{Deserialize, Serialize};

use super::typing::{Config, Metrics, Parameters, Status};

/// Every reply a worker sends back carries a status.
pub trait Reply {
    /// The status the worker attached to this reply.
    fn status(&self) -> &Status;
}

macro_rules! impl_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reply for $ty {
                fn status(&self) -> &Status {
                    &self.status
                }
            }
        )*
    };
}

/// Asks a worker to train on the given parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitIns {
    pub parameters: Parameters,
    #[serde(default)]
    pub config: Config,
}

/// The outcome of a worker's local training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitRes {
    pub status: Status,
    pub parameters: Parameters,
    pub num_examples: u64,
    #[serde(default)]
    pub metrics: Metrics,
}

/// Asks a worker to evaluate the given parameters on its local data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateIns {
    pub parameters: Parameters,
    #[serde(default)]
    pub config: Config,
}

/// The outcome of a worker's local evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRes {
    pub status: Status,
    pub loss: f64,
    pub num_examples: u64,
    #[serde(default)]
    pub metrics: Metrics,
}

/// Asks a worker for its current local parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetParametersIns {
    #[serde(default)]
    pub config: Config,
}

/// A worker's current local parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetParametersRes {
    pub status: Status,
    pub parameters: Parameters,
}

/// A worker's contribution vector for the last round, usually its gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientsRes {
    pub status: Status,
    pub gradients: Parameters,
}

/// Asks the coordinator to score an ordered sequence of contribution vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionsIns {
    pub gradients: Vec<Parameters>,
}

/// The coordinator's scores, positionally matching `ContributionsIns::gradients`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionsRes {
    pub status: Status,
    pub scores: Vec<f64>,
}

/// The role a worker claims when asked to identify itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Participant,
    Coordinator,
}

/// A worker's answer to an identify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyRes {
    pub status: Status,
    pub role: Role,
}

/// Tells a worker to disconnect and, optionally, when to come back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconnectIns {
    pub seconds: Option<u64>,
}

/// A worker's acknowledgment of a reconnect instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectRes {
    pub status: Status,
    pub reason: String,
}

impl_reply!(
    FitRes,
    EvaluateRes,
    GetParametersRes,
    GradientsRes,
    ContributionsRes,
    IdentifyRes,
    DisconnectRes,
);
