//! # Glycorisk
//!
//! Diabetes risk classification core.
//!
//! This crate provides:
//! - SI unit conversion for interactive lab inputs
//! - A skew-aware log transform shared by training and serving
//! - A frozen feature schema that assembles model inputs in training order
//! - A prediction service with an explicit NotReady/Ready lifecycle
//! - An append-only, line-delimited audit trail of every prediction
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types and pure functions (records, units, transform, schema, audit entries)
//! - `ports`: Trait definitions for the scoring function and the audit store
//! - `adapters`: Concrete implementations (linear model, bundle loader, JSONL audit log, log sanitizer)
//! - `application`: Use cases orchestrating domain and ports (prediction, auditing, training prep)
//! - `config`: Environment-driven settings

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{FeatureSchema, FeatureVector, Prediction, PredictionError, RawRecord, Severity};

/// Result type for Glycorisk operations
pub type Result<T> = std::result::Result<T, GlycoriskError>;

/// Main error type for Glycorisk
#[derive(Debug, thiserror::Error)]
pub enum GlycoriskError {
    #[error("Unit conversion failed: {0}")]
    Conversion(#[from] domain::ConversionError),

    #[error("Feature schema error: {0}")]
    Schema(#[from] domain::SchemaError),

    #[error("Model bundle error: {0}")]
    Artifact(#[from] adapters::ArtifactError),

    #[error("Audit log error: {0}")]
    Audit(#[from] adapters::AuditError),

    #[error("Model error: {0}")]
    Model(#[from] ports::ModelError),

    #[error("Prediction failed: {0}")]
    Prediction(#[from] domain::PredictionError),

    #[error("Training data error: {0}")]
    Training(#[from] application::TrainingError),

    #[error("Invalid patient data: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
