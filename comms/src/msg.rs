use serde::{Deserialize, Serialize};

use crate::specs::{
    ContributionsIns, ContributionsRes, DisconnectRes, EvaluateIns, EvaluateRes, FitIns, FitRes,
    GetParametersIns, GetParametersRes, GradientsRes, IdentifyRes, ReconnectIns,
};

/// The command for the `Control` variant of the `Msg` enum, sent by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Fit(FitIns),
    Evaluate(EvaluateIns),
    GetParameters(GetParametersIns),
    GetGradients,
    GetContributions(ContributionsIns),
    Identify,
    Reconnect(ReconnectIns),
}

impl Command {
    /// A short name for this command, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Fit(_) => "fit",
            Command::Evaluate(_) => "evaluate",
            Command::GetParameters(_) => "get_parameters",
            Command::GetGradients => "get_gradients",
            Command::GetContributions(_) => "get_contributions",
            Command::Identify => "identify",
            Command::Reconnect(_) => "reconnect",
        }
    }
}

/// The payload data for the `Data` variant of the `Msg` enum, sent back by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Fit(FitRes),
    Evaluate(EvaluateRes),
    GetParameters(GetParametersRes),
    Gradients(GradientsRes),
    Contributions(ContributionsRes),
    Identify(IdentifyRes),
    Disconnect(DisconnectRes),
}

impl Payload {
    /// A short name for this payload, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Fit(_) => "fit",
            Payload::Evaluate(_) => "evaluate",
            Payload::GetParameters(_) => "get_parameters",
            Payload::Gradients(_) => "gradients",
            Payload::Contributions(_) => "contributions",
            Payload::Identify(_) => "identify",
            Payload::Disconnect(_) => "disconnect",
        }
    }
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msg {
    /// The first message a worker sends after connecting.
    Connect { worker_id: String },
    Control(Command),
    Data(Payload),
    Err(String),
}
