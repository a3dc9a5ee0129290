//! Prediction result and failure types.

use serde::{Deserialize, Serialize};

use super::schema::SchemaError;

/// A model decision mapped to its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Raw class index returned by the model.
    pub class_index: usize,

    /// Label from the frozen schema's index → label mapping.
    pub label: String,
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// Failure tier reported to upstream callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No model is loaded; retrying later may succeed.
    Unavailable,
    /// The request reached the model and failed there.
    Internal,
}

impl Severity {
    /// HTTP-style status code for this tier.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Why a prediction did not produce a label.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("Prediction service unavailable: {0}")]
    Unavailable(String),

    #[error("Feature assembly failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Internal prediction error: {0}")]
    Inference(String),
}

impl PredictionError {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Unavailable(_) => Severity::Unavailable,
            Self::Schema(_) | Self::Inference(_) => Severity::Internal,
        }
    }
}
