//! Deployment module

pub mod archive;
pub mod drift;
pub mod fetcher;
pub mod fsm;
pub mod lock;
pub mod orchestrator;
