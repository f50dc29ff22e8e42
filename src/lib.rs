//! Batch-orchestrated stochastic trial runner.
//!
//! Partitions an arbitrarily large (or unbounded) trial count into chunks
//! that respect the compute backend's two capacity ceilings, drives
//! asynchronous dispatch/readback cycles without blocking, and folds each
//! chunk's outcomes into a live histogram with summary statistics
//! (throughput, min/max turns survived, ETA to a target count).

pub mod aggregate;
pub mod backend;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod server;
