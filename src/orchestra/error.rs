use std::{error::Error, fmt, io};

use crate::orchestra::worker::WorkerId;

/// The orchestra module's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can end a campaign or reject a call into the orchestrator.
///
/// Per-worker failures are never reported through this type, they travel as data
/// inside a dispatch batch's failure set.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before the campaign starts.
    InvalidConfig(String),
    /// The coordinator could not produce contribution scores for a round.
    CoordinatorUnavailable { round: u64, reason: String },
    /// A dispatch batch named the same worker more than once.
    DuplicateWorker(WorkerId),
    /// Failed to bind the listener workers connect to.
    ConnectionFailed { addr: String, source: io::Error },
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::CoordinatorUnavailable { round, reason } => {
                write!(f, "coordinator unavailable in round {round}: {reason}")
            }
            Self::DuplicateWorker(id) => {
                write!(f, "worker {id} appears more than once in a dispatch batch")
            }
            Self::ConnectionFailed { addr, source } => {
                write!(f, "failed to listen on {addr}: {source}")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
