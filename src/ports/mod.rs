//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (the trained model and the
//! audit log).

mod audit_store;
mod classifier;

pub use audit_store::{AuditPage, AuditStore};
pub use classifier::{Classifier, ModelError};
