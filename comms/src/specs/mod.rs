mod instructions;
mod typing;

pub use instructions::{
    ContributionsIns, ContributionsRes, DisconnectRes, EvaluateIns, EvaluateRes, FitIns, FitRes,
    GetParametersIns, GetParametersRes, GradientsRes, IdentifyRes, ReconnectIns, Reply, Role,
};
pub use typing::{Code, Config, Metrics, Parameters, Scalar, Status};
