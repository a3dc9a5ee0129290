//! Classifier port: Trait for the trained scoring function.
//!
//! The service only needs "a callable that accepts rows of features and
//! returns one class index per row". How the model was trained or stored
//! is the adapter's concern.

use crate::domain::FeatureVector;

/// Errors raised by a loaded model during scoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("Model produced a non-finite score for row {0}")]
    NonFiniteScore(usize),

    #[error("Invalid model: {0}")]
    Invalid(String),
}

/// Trait for a loaded, read-only classifier.
///
/// Implementations must be safe to call from many threads at once without
/// synchronization.
pub trait Classifier: Send + Sync {
    /// Number of features each row must carry.
    fn n_features(&self) -> usize;

    /// Number of classes the model can emit.
    fn n_classes(&self) -> usize;

    /// Feature names the model was fit on, if the artifact records them.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    /// Score a batch of rows.
    ///
    /// # Returns
    /// One class index in `0..n_classes()` per input row.
    ///
    /// # Errors
    /// Returns `ModelError` if a row has the wrong shape or scoring fails.
    fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<usize>, ModelError>;
}
