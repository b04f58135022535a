pub mod audit;
pub mod communication;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod membership;
pub mod orchestrator;
pub mod registry;
pub mod reputation;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
