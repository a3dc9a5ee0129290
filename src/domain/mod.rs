//! Domain layer: Core types and pure logic.
//!
//! Nothing in here touches the filesystem except `FeatureSchema` load/save.
//! Serving and training both go through these same functions, so the
//! feature vector a model sees at inference is built exactly like the one
//! it was fit on.

mod audit;
mod diagnosis;
mod patient;
mod record;
mod schema;
mod transform;
mod units;

pub use audit::{new_request_id, AuditLogEntry, AuditOutput};
pub use diagnosis::{Prediction, PredictionError, Severity};
pub use patient::{Gender, PatientForm};
pub use record::{FieldValue, FeatureVector, RawRecord, Table, TableError};
pub use schema::{
    assemble, derive_feature_order, FeatureSchema, SchemaError, SCHEMA_VERSION,
};
pub use transform::{
    derived_name, sample_skewness, select_skewed_columns, transform, ColumnFrame, LogTransformer,
    TransformError, TransformReport, DEFAULT_LOG_SUFFIX, SKEW_THRESHOLD,
};
pub use units::{convert, convert_key, Analyte, Conversion, ConversionError, SiUnit};
