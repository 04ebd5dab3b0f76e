//! CI API client module

pub mod artifacts;
pub mod client;
pub mod repos;
pub mod runs;
