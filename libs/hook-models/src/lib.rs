//! Webhook payloads and deployd response envelopes

pub mod models;

pub use models::*;
