//! Storage module

pub mod deployments;
pub mod kv;
pub mod layout;
pub mod settings;
