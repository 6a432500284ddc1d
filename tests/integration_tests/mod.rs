//! Integration tests module
//!
//! End-to-end tests against the in-memory coordination store and mock HTTP
//! servers, including:
//! - Lease contention between several nodes
//! - Queue producer → ingestion → sinks
//! - Worker-pool health checks with retries

pub mod election_test;
pub mod healthcheck_test;
pub mod ingestion_test;
