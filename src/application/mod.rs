//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases: serving predictions, auditing them, and preparing
//! training data with the same transform and order the service uses.

mod audited;
mod prediction;
pub mod training;

pub use audited::{AuditedPrediction, AuditedPredictionService};
pub use prediction::PredictionService;
pub use training::{prepare, Dataset, PreparedTraining, TrainingConfig, TrainingError};
