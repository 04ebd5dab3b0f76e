//! CI and source hosting API models

pub mod models;

pub use models::*;
