//! Adapters layer: Concrete implementations of ports.
//!
//! - `linear`: standardized linear classifier loaded from JSON
//! - `artifact`: model bundle loading and integrity checks
//! - `jsonl`: append-only JSON Lines audit log
//! - `sanitize`: patient-data and secret filtering for logs

pub mod artifact;
pub mod jsonl;
pub mod linear;
pub mod sanitize;

pub use artifact::{load_bundle, ArtifactError, BundleOptions, ModelBundle};
pub use jsonl::{AuditError, JsonlAuditStore};
pub use linear::{ExportedLinearModel, LinearClassifier};
