//! Webhook ingestion module

pub mod ingest;
pub mod signature;
