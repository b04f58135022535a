pub mod configs;
pub mod orchestra;
pub mod strategy;

pub use orchestra::{
    error::{OrchestratorError, Result},
    history::History,
    orchestrator::{CampaignStage, RoundOrchestrator},
    registry::{MembershipState, WorkerRegistry},
    worker::{Worker, WorkerHandle, WorkerId},
};
