//! Prediction service: frozen schema + loaded classifier.
//!
//! The service is built once at startup and is either `Ready` (schema and
//! model loaded and checked against each other) or `NotReady` (with the
//! reason). It never loads lazily: a `NotReady` service answers every
//! request with `PredictionError::Unavailable` without touching a model.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::adapters::artifact::check_compatibility;
use crate::adapters::ArtifactError;
use crate::domain::{FeatureSchema, FeatureVector, Prediction, PredictionError, RawRecord};
use crate::ports::Classifier;

enum ServiceState<C> {
    NotReady {
        reason: String,
    },
    Ready {
        classifier: Arc<C>,
        schema: Arc<FeatureSchema>,
    },
}

/// Service for turning records into labelled predictions.
///
/// Cheap to share: wrap in `Arc` and call from any number of threads. The
/// classifier and schema are read-only after construction.
pub struct PredictionService<C: Classifier> {
    state: ServiceState<C>,
}

impl<C: Classifier + 'static> PredictionService<C> {
    /// A service that refuses every request.
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self {
            state: ServiceState::NotReady { reason: reason.into() },
        }
    }

    /// A ready service, after checking the model against its schema.
    ///
    /// # Errors
    /// Returns error if the schema is inconsistent or the model was not fit
    /// on the schema's frozen order and labels.
    pub fn ready(classifier: C, schema: FeatureSchema) -> Result<Self, ArtifactError> {
        schema.validate()?;
        check_compatibility(&classifier, &schema)?;
        Ok(Self {
            state: ServiceState::Ready {
                classifier: Arc::new(classifier),
                schema: Arc::new(schema),
            },
        })
    }

    /// Run `load` on a worker thread and wait at most `timeout` for it.
    ///
    /// Any failure (load error, incompatibility, panic, timeout) leaves the
    /// service `NotReady` with the cause as its reason. A loader that times
    /// out is abandoned; its result is discarded.
    pub fn start<F, E>(load: F, timeout: Duration) -> Self
    where
        F: FnOnce() -> Result<(C, FeatureSchema), E> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        tracing::info!("Loading model (timeout {}s)...", timeout.as_secs_f64());

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("model-loader".into())
            .spawn(move || {
                let outcome = load().map_err(|e| e.to_string());
                // The receiver is gone if startup already timed out.
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return Self::not_ready_logged(format!("Cannot spawn model loader: {e}"));
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok((classifier, schema))) => match Self::ready(classifier, schema) {
                Ok(service) => {
                    tracing::info!("Prediction service ready");
                    service
                }
                Err(e) => Self::not_ready_logged(e.to_string()),
            },
            Ok(Err(reason)) => Self::not_ready_logged(reason),
            Err(mpsc::RecvTimeoutError::Timeout) => Self::not_ready_logged(format!(
                "Model load did not finish within {}s",
                timeout.as_secs_f64()
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Self::not_ready_logged("Model loader panicked".to_string())
            }
        }
    }

    fn not_ready_logged(reason: String) -> Self {
        tracing::error!("Prediction service not ready: {}", reason);
        Self::not_ready(reason)
    }
}

impl<C: Classifier> PredictionService<C> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ServiceState::Ready { .. })
    }

    /// Why the service is not ready, if it is not.
    #[must_use]
    pub fn not_ready_reason(&self) -> Option<&str> {
        match &self.state {
            ServiceState::NotReady { reason } => Some(reason.as_str()),
            ServiceState::Ready { .. } => None,
        }
    }

    /// The frozen schema, when ready.
    #[must_use]
    pub fn schema(&self) -> Option<&FeatureSchema> {
        match &self.state {
            ServiceState::Ready { schema, .. } => Some(schema.as_ref()),
            ServiceState::NotReady { .. } => None,
        }
    }

    fn loaded(&self) -> Result<(&C, &FeatureSchema), PredictionError> {
        match &self.state {
            ServiceState::Ready { classifier, schema } => Ok((classifier.as_ref(), schema.as_ref())),
            ServiceState::NotReady { reason } => Err(PredictionError::Unavailable(reason.clone())),
        }
    }

    /// Transform, assemble and classify one SI-unit record.
    ///
    /// # Errors
    /// `Unavailable` when not ready; `Schema` when the record lacks a frozen
    /// feature; `Inference` when the model fails.
    pub fn predict(&self, record: &RawRecord) -> Result<Prediction, PredictionError> {
        let (_, schema) = self.loaded()?;
        let features = schema.prepare(record)?;
        tracing::debug!("Assembled {} features", features.len());

        let mut predictions = self.predict_features(std::slice::from_ref(&features))?;
        predictions
            .pop()
            .ok_or_else(|| PredictionError::Inference("model returned no prediction".into()))
    }

    /// Classify already assembled rows.
    ///
    /// # Errors
    /// See [`PredictionService::predict`].
    pub fn predict_features(&self, rows: &[FeatureVector]) -> Result<Vec<Prediction>, PredictionError> {
        let (classifier, schema) = self.loaded()?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| classifier.predict(rows)));
        let indices = match outcome {
            Ok(Ok(indices)) => indices,
            Ok(Err(e)) => return Err(PredictionError::Inference(e.to_string())),
            Err(payload) => {
                let cause = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Model panicked during inference: {}", cause);
                return Err(PredictionError::Inference(format!("model panicked: {cause}")));
            }
        };

        if indices.len() != rows.len() {
            return Err(PredictionError::Inference(format!(
                "model returned {} predictions for {} rows",
                indices.len(),
                rows.len()
            )));
        }

        indices
            .into_iter()
            .map(|class_index| {
                let label = schema.label(class_index).ok_or_else(|| {
                    PredictionError::Inference(format!("class index {class_index} has no label"))
                })?;
                Ok(Prediction {
                    class_index,
                    label: label.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::ports::ModelError;
    use std::collections::BTreeMap;

    /// Classifier that always answers the same class.
    pub struct FixedClassifier {
        pub class_index: usize,
        pub names: Vec<String>,
        pub n_classes: usize,
    }

    impl FixedClassifier {
        pub fn for_schema(schema: &FeatureSchema, class_index: usize) -> Self {
            Self {
                class_index,
                names: schema.feature_order.clone(),
                n_classes: schema.labels.len(),
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn n_features(&self) -> usize {
            self.names.len()
        }

        fn n_classes(&self) -> usize {
            self.n_classes
        }

        fn feature_names(&self) -> Option<&[String]> {
            Some(&self.names)
        }

        fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<usize>, ModelError> {
            if self.class_index == usize::MAX {
                panic!("scoring exploded");
            }
            Ok(vec![self.class_index; rows.len()])
        }
    }

    pub fn diabetes_schema() -> FeatureSchema {
        let mut gender = BTreeMap::new();
        gender.insert("F".to_string(), 0.0);
        gender.insert("M".to_string(), 1.0);
        gender.insert("f".to_string(), 0.0);
        let mut encodings = BTreeMap::new();
        encodings.insert("Gender".to_string(), gender);

        FeatureSchema::freeze(
            ["AGE", "Urea", "Cr", "Chol", "TG", "HDL", "LDL", "VLDL", "BMI"]
                .map(String::from)
                .to_vec(),
            ["Urea", "Cr", "TG", "HDL", "LDL", "VLDL"].map(String::from).to_vec(),
            vec!["Gender".into()],
            encodings,
            ["Diabético", "Não-Diabético", "Pré-Diabético"].map(String::from).to_vec(),
        )
        .expect("schema")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::{PatientForm, Severity};

    #[test]
    fn test_ready_service_labels_prediction() {
        let schema = diabetes_schema();
        let service =
            PredictionService::ready(FixedClassifier::for_schema(&schema, 1), schema).expect("ready");
        assert!(service.is_ready());

        let prediction = service
            .predict(&PatientForm::default().to_si_record())
            .expect("predict");
        assert_eq!(prediction.class_index, 1);
        assert_eq!(prediction.label, "Não-Diabético");
    }

    #[test]
    fn test_not_ready_fails_fast() {
        let service: PredictionService<FixedClassifier> = PredictionService::not_ready("no model");
        let err = service.predict(&RawRecord::new()).expect_err("unavailable");
        assert_eq!(err.severity(), Severity::Unavailable);
        assert_eq!(service.not_ready_reason(), Some("no model"));
        assert!(service.schema().is_none());
    }

    #[test]
    fn test_missing_feature_is_internal_error() {
        let schema = diabetes_schema();
        let service =
            PredictionService::ready(FixedClassifier::for_schema(&schema, 0), schema).expect("ready");
        let err = service
            .predict(&RawRecord::new().with("AGE", 39))
            .expect_err("missing");
        assert!(matches!(err, PredictionError::Schema(_)));
        assert_eq!(err.severity(), Severity::Internal);
    }

    #[test]
    fn test_panicking_model_is_contained() {
        let schema = diabetes_schema();
        let service = PredictionService::ready(FixedClassifier::for_schema(&schema, usize::MAX), schema)
            .expect("ready");
        let err = service
            .predict(&PatientForm::default().to_si_record())
            .expect_err("panic");
        assert!(matches!(err, PredictionError::Inference(ref m) if m.contains("scoring exploded")));
    }

    #[test]
    fn test_out_of_range_class_is_an_error() {
        let schema = diabetes_schema();
        let mut clf = FixedClassifier::for_schema(&schema, 7);
        clf.n_classes = 3;
        let service = PredictionService::ready(clf, schema).expect("ready");
        let err = service
            .predict(&PatientForm::default().to_si_record())
            .expect_err("no label");
        assert!(matches!(err, PredictionError::Inference(_)));
    }

    #[test]
    fn test_incompatible_model_is_rejected() {
        let schema = diabetes_schema();
        let mut clf = FixedClassifier::for_schema(&schema, 0);
        clf.names.reverse();
        assert!(PredictionService::ready(clf, schema).is_err());
    }

    #[test]
    fn test_start_reports_load_failure_and_timeout() {
        let failed: PredictionService<FixedClassifier> = PredictionService::start(
            || Err::<(FixedClassifier, FeatureSchema), _>("schema.json missing"),
            Duration::from_secs(5),
        );
        assert_eq!(failed.not_ready_reason(), Some("schema.json missing"));

        let slow: PredictionService<FixedClassifier> = PredictionService::start(
            || {
                thread::sleep(Duration::from_millis(500));
                Err::<(FixedClassifier, FeatureSchema), _>("late")
            },
            Duration::from_millis(20),
        );
        assert!(!slow.is_ready());
        assert!(slow.not_ready_reason().expect("reason").contains("did not finish"));

        let ok = PredictionService::start(
            || {
                let schema = diabetes_schema();
                Ok::<_, String>((FixedClassifier::for_schema(&schema, 2), schema))
            },
            Duration::from_secs(5),
        );
        assert!(ok.is_ready());
    }

    #[test]
    fn test_shipped_bundle_serves_form_input() {
        use crate::adapters::{load_bundle, BundleOptions};

        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("models");
        let bundle = load_bundle(&dir, &BundleOptions::default()).expect("bundle");
        assert_eq!(
            bundle.schema.feature_order,
            ["AGE", "Chol", "BMI", "Urea_log", "Cr_log", "TG_log", "HDL_log", "LDL_log", "VLDL_log", "Gender"]
        );
        let service = PredictionService::ready(bundle.classifier, bundle.schema).expect("ready");

        let healthy = service
            .predict(&PatientForm::default().to_si_record())
            .expect("predict");
        assert_eq!(healthy.label, "Não-Diabético");

        let at_risk = PatientForm {
            age: 65,
            bmi: 36.0,
            triglycerides: 265.7,
            ..Default::default()
        };
        let prediction = service.predict(&at_risk.to_si_record()).expect("predict");
        assert_eq!(prediction.label, "Diabético");
    }
}
