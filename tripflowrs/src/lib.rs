//! Tripflowrs - application layer for the tripflow algorithms
//!
//! This crate provides:
//! - TOML configuration for the whole pipeline
//! - On-disk per-date dataset store (atomic writes, ordered locations, LRU cache)
//! - Batch pipeline orchestration (build, export, inspect)
//! - Query service over stored datasets
//! - The `tripflow` command line tool

// Re-export all public types from tripflow
pub use tripflow::*;

// TOML configuration
pub mod config;
pub use config::PipelineConfig;

// Per-date dataset files
pub mod store;
pub use store::{DatasetMeta, DatasetStore};

// Batch pipeline
pub mod pipeline;
pub use pipeline::{BuildReport, DayReport, Pipeline};

// Query interface
pub mod service;
pub use service::{CentersResponse, DailySummary, TripQueryService, TripsResponse};
