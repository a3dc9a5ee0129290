//! Audited prediction: every attempt is recorded in the audit log.
//!
//! The audit write happens after the prediction and is best-effort
//! (at-most-once). A failed write is reported back in
//! `AuditedPrediction::audit` and logged, but never changes the prediction
//! result the caller receives.

use std::sync::Arc;

use crate::domain::{
    new_request_id, AuditLogEntry, AuditOutput, PatientForm, Prediction, PredictionError, RawRecord,
};
use crate::ports::{AuditPage, AuditStore, Classifier};
use crate::GlycoriskError;

use super::PredictionService;

/// Outcome of one audited prediction attempt.
#[derive(Debug)]
pub struct AuditedPrediction<E> {
    /// Id of the audit entry written (or attempted) for this request.
    pub request_id: String,
    pub result: Result<Prediction, PredictionError>,
    /// Whether the audit entry was persisted.
    pub audit: Result<(), E>,
}

/// Prediction service plus audit trail.
pub struct AuditedPredictionService<C, S>
where
    C: Classifier,
    S: AuditStore,
{
    predictor: Arc<PredictionService<C>>,
    store: Arc<S>,
}

impl<C, S> AuditedPredictionService<C, S>
where
    C: Classifier,
    S: AuditStore,
{
    pub fn new(predictor: Arc<PredictionService<C>>, store: Arc<S>) -> Self {
        Self { predictor, store }
    }

    #[must_use]
    pub fn predictor(&self) -> &PredictionService<C> {
        &self.predictor
    }

    /// Predict for an SI-unit record and audit the attempt under `route`.
    pub fn predict(&self, route: &str, record: RawRecord) -> AuditedPrediction<S::Error> {
        let request_id = new_request_id();
        let result = self.predictor.predict(&record);

        match &result {
            Ok(p) => tracing::info!("Prediction {} on {}: {}", request_id, route, p.label),
            Err(e) => tracing::warn!(
                "Prediction {} on {} failed ({}): {}",
                request_id,
                route,
                e.severity(),
                e
            ),
        }

        let entry = AuditLogEntry::at(
            request_id.clone(),
            route,
            chrono::Utc::now(),
            record,
            AuditOutput::from_result(&result),
        );
        let audit = self.store.append(&entry);
        if let Err(e) = &audit {
            tracing::warn!("Failed to write audit entry {}: {}", request_id, e);
        }

        AuditedPrediction {
            request_id,
            result,
            audit,
        }
    }

    /// Validate and convert a conventional-unit form, then predict.
    ///
    /// # Errors
    /// Returns `GlycoriskError::Validation` with every violation; an invalid
    /// form is rejected before any prediction or audit happens.
    pub fn predict_form(&self, route: &str, form: &PatientForm) -> crate::Result<AuditedPrediction<S::Error>> {
        form.validate()
            .map_err(|errors| GlycoriskError::Validation(errors.join("; ")))?;
        Ok(self.predict(route, form.to_si_record()))
    }

    /// See [`AuditStore::query`].
    ///
    /// # Errors
    /// Returns error if the log cannot be read.
    pub fn query(&self, date: Option<&str>, route: Option<&str>) -> Result<Vec<AuditLogEntry>, S::Error> {
        self.store.query(date, route)
    }

    /// See [`AuditStore::query_page`].
    ///
    /// # Errors
    /// Returns error if the log cannot be read.
    pub fn query_page(
        &self,
        date: Option<&str>,
        route: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<AuditPage, S::Error> {
        self.store.query_page(date, route, offset, limit)
    }

    /// See [`AuditStore::get_by_id`].
    ///
    /// # Errors
    /// Returns error if the log cannot be read.
    pub fn get_by_id(&self, request_id: &str) -> Result<Option<AuditLogEntry>, S::Error> {
        self.store.get_by_id(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonlAuditStore;
    use crate::application::prediction::test_support::{diabetes_schema, FixedClassifier};
    use crate::domain::Severity;

    fn ready_service(dir: &std::path::Path) -> AuditedPredictionService<FixedClassifier, JsonlAuditStore> {
        let schema = diabetes_schema();
        let predictor =
            PredictionService::ready(FixedClassifier::for_schema(&schema, 1), schema).expect("ready");
        AuditedPredictionService::new(
            Arc::new(predictor),
            Arc::new(JsonlAuditStore::new(dir.join("audit.jsonl"))),
        )
    }

    #[test]
    fn test_success_is_audited_with_raw_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = ready_service(dir.path());

        let outcome = service
            .predict_form("/api/prediction/predict", &PatientForm::default())
            .expect("valid form");
        assert!(outcome.audit.is_ok());
        assert_eq!(outcome.result.as_ref().expect("prediction").label, "Não-Diabético");

        let entry = service
            .get_by_id(&outcome.request_id)
            .expect("read")
            .expect("audited");
        assert_eq!(entry.route, "/api/prediction/predict");
        assert_eq!(entry.input.number("Urea"), Some(3.83));
        assert!(!entry.input.contains("Urea_log"));
        assert!(entry.output.is_success());
    }

    #[test]
    fn test_failure_is_audited_with_error_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let predictor: PredictionService<FixedClassifier> = PredictionService::not_ready("no model");
        let service = AuditedPredictionService::new(
            Arc::new(predictor),
            Arc::new(JsonlAuditStore::new(dir.path().join("audit.jsonl"))),
        );

        let outcome = service.predict("/p", RawRecord::new().with("AGE", 39));
        assert!(outcome.result.is_err());

        let entries = service.query(None, None).expect("read");
        assert_eq!(entries.len(), 1);
        match &entries[0].output {
            AuditOutput::Error { severity, .. } => assert_eq!(*severity, Some(Severity::Unavailable)),
            other => panic!("expected error payload, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_form_is_not_audited() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = ready_service(dir.path());
        let form = PatientForm {
            age: 0,
            ..Default::default()
        };
        match service.predict_form("/p", &form) {
            Err(GlycoriskError::Validation(message)) => assert!(message.contains("Age 0")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(service.query(None, None).expect("read").is_empty());
    }

    #[test]
    fn test_failed_audit_write_keeps_prediction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").expect("write");

        let schema = diabetes_schema();
        let predictor =
            PredictionService::ready(FixedClassifier::for_schema(&schema, 0), schema).expect("ready");
        let service = AuditedPredictionService::new(
            Arc::new(predictor),
            Arc::new(JsonlAuditStore::new(blocker.join("audit.jsonl"))),
        );

        let outcome = service
            .predict_form("/p", &PatientForm::default())
            .expect("valid form");
        assert!(outcome.audit.is_err());
        assert_eq!(outcome.result.expect("prediction").label, "Diabético");
    }

    #[test]
    fn test_concurrent_predictions_write_whole_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = Arc::new(ready_service(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let outcome = service
                            .predict_form("/p", &PatientForm::default())
                            .expect("valid form");
                        assert!(outcome.audit.is_ok());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }

        let raw = std::fs::read_to_string(dir.path().join("audit.jsonl")).expect("read");
        assert_eq!(raw.lines().count(), 80);
        for line in raw.lines() {
            serde_json::from_str::<AuditLogEntry>(line).expect("well-formed line");
        }
        assert_eq!(service.query(None, None).expect("read").len(), 80);
    }

    #[test]
    fn test_inference_failure_is_audited_as_internal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let schema = diabetes_schema();
        let predictor = PredictionService::ready(FixedClassifier::for_schema(&schema, usize::MAX), schema)
            .expect("ready");
        let service = AuditedPredictionService::new(
            Arc::new(predictor),
            Arc::new(JsonlAuditStore::new(dir.path().join("audit.jsonl"))),
        );

        let outcome = service
            .predict_form("/p", &PatientForm::default())
            .expect("valid form");
        assert!(matches!(outcome.result, Err(PredictionError::Inference(_))));
        assert!(outcome.audit.is_ok());

        let entry = service
            .get_by_id(&outcome.request_id)
            .expect("read")
            .expect("audited");
        match &entry.output {
            AuditOutput::Error { error, severity, status } => {
                assert_eq!(*severity, Some(Severity::Internal));
                assert!(error.contains("scoring exploded"));
                assert_eq!(status, "error");
            }
            other => panic!("expected error payload, got {other:?}"),
        }
        assert_eq!(entry.input.number("Urea"), Some(3.83));
    }
}
