//! AI safety summary worker
//!
//! This library provides the job store and polling worker that augment
//! rental property safety scores with short AI-generated summaries. Jobs live
//! in a Postgres queue table and are claimed with row locks, so any number of
//! worker processes can share one queue.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod worker;
