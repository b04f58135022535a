mod campaign;

pub use campaign::{CampaignConfig, FedAvgConfig};
