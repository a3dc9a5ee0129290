//! Linear classifier adapter: Implementation of Classifier.
//!
//! Scores a standardized feature row with one linear function per class.
//! The JSON layout mirrors what the training pipeline exports from a
//! standard scaler followed by a (multinomial) logistic regression:
//!
//! - `z_j = (x_j - scaler_mean_j) / scaler_scale_j`
//! - `score_k = intercepts_k + Σ coefficients_kj · z_j`
//! - class = argmax over `score_k` (first maximum wins)
//!
//! A single coefficient row is a binary model: class 1 when its score is
//! positive, class 0 otherwise.

use serde::{Deserialize, Serialize};

use crate::domain::FeatureVector;
use crate::ports::{Classifier, ModelError};

/// Model parameters exported by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedLinearModel {
    /// Input names in the order the model was fit on.
    pub feature_names: Vec<String>,
    pub scaler_mean: Vec<f64>,
    pub scaler_scale: Vec<f64>,
    /// One row per class (or a single row for binary models).
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

/// Validated, read-only linear classifier.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    model: ExportedLinearModel,
}

impl LinearClassifier {
    /// Validate exported parameters.
    ///
    /// # Errors
    /// Returns `ModelError::Invalid` if lengths disagree or a parameter is
    /// not finite.
    pub fn new(model: ExportedLinearModel) -> Result<Self, ModelError> {
        let n = model.feature_names.len();
        if n == 0 {
            return Err(ModelError::Invalid("model has no features".into()));
        }
        if model.scaler_mean.len() != n || model.scaler_scale.len() != n {
            return Err(ModelError::Invalid(
                "Scaler lengths do not match feature_names length".into(),
            ));
        }
        if model.coefficients.is_empty() || model.coefficients.len() != model.intercepts.len() {
            return Err(ModelError::Invalid(format!(
                "Expected one intercept per coefficient row, got {} rows and {} intercepts",
                model.coefficients.len(),
                model.intercepts.len()
            )));
        }
        if model.coefficients.iter().any(|row| row.len() != n) {
            return Err(ModelError::Invalid(
                "Coefficient row length does not match feature_names length".into(),
            ));
        }
        if model.scaler_scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ModelError::Invalid("scaler_scale must be finite and > 0".into()));
        }
        let all_finite = model
            .scaler_mean
            .iter()
            .chain(&model.intercepts)
            .chain(model.coefficients.iter().flatten())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ModelError::Invalid("model contains non-finite parameters".into()));
        }

        Ok(Self { model })
    }

    /// Parse and validate a `model.json` document.
    ///
    /// # Errors
    /// Returns `ModelError::Invalid` for malformed JSON or parameters.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: ExportedLinearModel =
            serde_json::from_str(json).map_err(|e| ModelError::Invalid(e.to_string()))?;
        Self::new(model)
    }

    fn is_binary(&self) -> bool {
        self.model.coefficients.len() == 1
    }

    /// Per-class scores for one row.
    ///
    /// # Errors
    /// Returns error on a feature count mismatch.
    pub fn decision_function(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        let n = self.model.feature_names.len();
        if row.len() != n {
            return Err(ModelError::FeatureCount {
                expected: n,
                actual: row.len(),
            });
        }

        let z: Vec<f64> = row
            .iter()
            .zip(&self.model.scaler_mean)
            .zip(&self.model.scaler_scale)
            .map(|((x, mean), scale)| (x - mean) / scale)
            .collect();

        Ok(self
            .model
            .coefficients
            .iter()
            .zip(&self.model.intercepts)
            .map(|(coef, intercept)| intercept + coef.iter().zip(&z).map(|(c, v)| c * v).sum::<f64>())
            .collect())
    }
}

impl Classifier for LinearClassifier {
    fn n_features(&self) -> usize {
        self.model.feature_names.len()
    }

    fn n_classes(&self) -> usize {
        if self.is_binary() {
            2
        } else {
            self.model.coefficients.len()
        }
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.model.feature_names)
    }

    fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<usize>, ModelError> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let scores = self.decision_function(row.as_slice())?;
                if scores.iter().any(|s| !s.is_finite()) {
                    return Err(ModelError::NonFiniteScore(i));
                }
                if self.is_binary() {
                    return Ok(usize::from(scores[0] > 0.0));
                }
                let mut best = 0;
                for (k, score) in scores.iter().enumerate().skip(1) {
                    if *score > scores[best] {
                        best = k;
                    }
                }
                Ok(best)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_feature_model(coefficients: Vec<Vec<f64>>, intercepts: Vec<f64>) -> ExportedLinearModel {
        ExportedLinearModel {
            feature_names: vec!["a".into(), "b".into()],
            scaler_mean: vec![10.0, 0.0],
            scaler_scale: vec![2.0, 1.0],
            coefficients,
            intercepts,
        }
    }

    #[test]
    fn test_standardization_and_argmax() {
        let clf = LinearClassifier::new(two_feature_model(
            vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.0, 1.0]],
            vec![0.0, 0.0, 0.5],
        ))
        .expect("valid");

        // a=14 → z=2: scores [2, -2, 0.5+b]
        let rows = vec![
            FeatureVector::new(vec![14.0, 0.0]),
            FeatureVector::new(vec![6.0, 0.0]),
            FeatureVector::new(vec![10.0, 3.0]),
        ];
        assert_eq!(clf.predict(&rows).expect("predict"), vec![0, 1, 2]);
        assert_eq!(clf.n_classes(), 3);
        assert_eq!(clf.decision_function(&[14.0, 0.0]).expect("scores"), vec![2.0, -2.0, 0.5]);
    }

    #[test]
    fn test_binary_model() {
        let clf = LinearClassifier::new(two_feature_model(vec![vec![1.0, 0.0]], vec![0.0])).expect("valid");
        assert_eq!(clf.n_classes(), 2);
        let rows = vec![FeatureVector::new(vec![12.0, 0.0]), FeatureVector::new(vec![8.0, 0.0])];
        assert_eq!(clf.predict(&rows).expect("predict"), vec![1, 0]);
    }

    #[test]
    fn test_ties_pick_first_class() {
        let clf = LinearClassifier::new(two_feature_model(
            vec![vec![0.0, 0.0], vec![0.0, 0.0]],
            vec![1.0, 1.0],
        ))
        .expect("valid");
        assert_eq!(clf.predict(&[FeatureVector::new(vec![0.0, 0.0])]).expect("predict"), vec![0]);
    }

    #[test]
    fn test_shape_errors() {
        let clf = LinearClassifier::new(two_feature_model(vec![vec![1.0, 1.0]], vec![0.0])).expect("valid");
        let err = clf.predict(&[FeatureVector::new(vec![1.0])]).expect_err("short row");
        assert_eq!(err, ModelError::FeatureCount { expected: 2, actual: 1 });

        let bad = two_feature_model(vec![vec![1.0]], vec![0.0]);
        assert!(LinearClassifier::new(bad).is_err());

        let mut zero_scale = two_feature_model(vec![vec![1.0, 1.0]], vec![0.0]);
        zero_scale.scaler_scale[1] = 0.0;
        assert!(LinearClassifier::new(zero_scale).is_err());
    }

    #[test]
    fn test_non_finite_input_is_reported() {
        let clf = LinearClassifier::new(two_feature_model(vec![vec![1.0, 1.0]], vec![0.0])).expect("valid");
        let err = clf
            .predict(&[FeatureVector::new(vec![1.0, 1.0]), FeatureVector::new(vec![f64::INFINITY, 0.0])])
            .expect_err("inf");
        assert_eq!(err, ModelError::NonFiniteScore(1));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "feature_names": ["a", "b"],
            "scaler_mean": [0.0, 0.0],
            "scaler_scale": [1.0, 1.0],
            "coefficients": [[1.0, -1.0]],
            "intercepts": [0.0]
        }"#;
        let clf = LinearClassifier::from_json(json).expect("parse");
        assert_eq!(clf.feature_names().expect("names"), ["a".to_string(), "b".to_string()]);
        assert!(LinearClassifier::from_json("{}").is_err());
    }
}
