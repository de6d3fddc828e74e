//! # queuectl
//!
//! Persistent background job queue backed by SQLite.
//!
//! Provides the job catalog with a race-safe claim, the retry/backoff/
//! dead-letter policy, a pool of concurrent workers with heartbeats, and
//! OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;
