use std::{fs, num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::orchestra::{
    error::{OrchestratorError, Result},
    membership::Methodology,
};

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_methodology() -> String {
    "delete-one".into()
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("contributions.txt")
}

fn default_wait_timeout_secs() -> u64 {
    60
}

fn default_fraction() -> f64 {
    1.0
}

fn default_min_workers() -> usize {
    2
}

/// The knobs of the reference federated averaging strategy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FedAvgConfig {
    #[serde(default = "default_fraction")]
    pub fraction_fit: f64,
    #[serde(default = "default_fraction")]
    pub fraction_evaluate: f64,
    #[serde(default = "default_min_workers")]
    pub min_fit_workers: usize,
    #[serde(default = "default_min_workers")]
    pub min_evaluate_workers: usize,
    #[serde(default = "default_min_workers")]
    pub min_available_workers: usize,
}

impl Default for FedAvgConfig {
    fn default() -> Self {
        Self {
            fraction_fit: default_fraction(),
            fraction_evaluate: default_fraction(),
            min_fit_workers: default_min_workers(),
            min_evaluate_workers: default_min_workers(),
            min_available_workers: default_min_workers(),
        }
    }
}

/// Everything needed to run a campaign, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub num_rounds: u64,
    pub round_timeout_secs: Option<u64>,
    pub max_concurrency: Option<NonZeroUsize>,
    #[serde(default = "default_methodology")]
    pub methodology: String,
    pub threshold: f64,
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    #[serde(default)]
    pub strategy: FedAvgConfig,
    pub history_out: Option<PathBuf>,
}

impl CampaignConfig {
    /// Loads and validates a campaign config from a JSON file.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the file cannot be read, parsed or fails validation.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            OrchestratorError::InvalidConfig(format!("cannot read '{path}': {e}"))
        })?;

        Self::from_json(&content)
    }

    /// Parses and validates a campaign config.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| OrchestratorError::InvalidConfig(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_secs.map(Duration::from_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn methodology(&self) -> Methodology {
        match self.methodology.parse() {
            Ok(methodology) => methodology,
            Err(never) => match never {},
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "threshold must be a finite number, got {}",
                self.threshold
            )));
        }

        let strategy = &self.strategy;
        for (name, fraction) in [
            ("fraction_fit", strategy.fraction_fit),
            ("fraction_evaluate", strategy.fraction_evaluate),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {fraction}"
                )));
            }
        }

        if strategy.min_available_workers == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "min_available_workers must be greater than 0".into(),
            ));
        }

        if strategy.min_fit_workers > strategy.min_available_workers {
            return Err(OrchestratorError::InvalidConfig(format!(
                "min_fit_workers ({}) cannot exceed min_available_workers ({})",
                strategy.min_fit_workers, strategy.min_available_workers
            )));
        }

        if strategy.min_evaluate_workers > strategy.min_available_workers {
            return Err(OrchestratorError::InvalidConfig(format!(
                "min_evaluate_workers ({}) cannot exceed min_available_workers ({})",
                strategy.min_evaluate_workers, strategy.min_available_workers
            )));
        }

        Ok(())
    }
}
