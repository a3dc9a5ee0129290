//! Frozen feature schema.
//!
//! The column order a model was fit on is derived exactly once, at training
//! time, and persisted as `feature_order` next to the model. Serving reads it
//! back and gathers values in that order; it never re-derives the order from
//! whichever columns a live record happens to carry.
//!
//! Order: untransformed numeric columns, then transformed columns (in the
//! order their sources appear in `numeric_columns`), then categorical
//! columns.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::record::{FeatureVector, FieldValue, RawRecord};
use super::transform::{derived_name, LogTransformer, TransformError, DEFAULT_LOG_SUFFIX};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised while validating a schema or assembling features.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unsupported schema version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Invalid schema: {0}")]
    Invalid(String),

    #[error("Frozen feature order does not match the schema's column lists: expected {expected:?}, found {found:?}")]
    OrderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Missing feature '{0}'")]
    MissingFeature(String),

    #[error("Feature '{0}' must be numeric")]
    NotNumeric(String),

    #[error("Feature '{0}' is not finite")]
    NonFinite(String),

    #[error("Unknown category '{value}' for '{column}'")]
    UnknownCategory { column: String, value: String },

    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Cannot read or write schema: {0}")]
    Io(String),
}

/// Derive the model input order.
///
/// `is_present` answers whether a column exists in the frame the order is
/// being derived from; a numeric column counts as transformed when its
/// derived counterpart is present.
#[must_use]
pub fn derive_feature_order<S, F>(
    numeric_columns: &[S],
    categorical_columns: &[S],
    transform_suffix: &str,
    is_present: F,
) -> Vec<String>
where
    S: AsRef<str>,
    F: Fn(&str) -> bool,
{
    let mut untransformed = Vec::new();
    let mut transformed = Vec::new();
    for column in numeric_columns {
        let column = column.as_ref();
        let derived = derived_name(column, transform_suffix);
        if is_present(&derived) {
            transformed.push(derived);
        } else {
            untransformed.push(column.to_string());
        }
    }

    untransformed
        .into_iter()
        .chain(transformed)
        .chain(categorical_columns.iter().map(|c| c.as_ref().to_string()))
        .collect()
}

/// Assemble features from a record, deriving the order from the record.
///
/// This is the unfrozen form: the output order depends on which derived
/// columns the record carries. Services use [`FeatureSchema::assemble`].
///
/// # Errors
/// Returns error if a value is missing, non-numeric or non-finite.
pub fn assemble<S: AsRef<str>>(
    record: &RawRecord,
    numeric_columns: &[S],
    categorical_columns: &[S],
    transform_suffix: &str,
) -> Result<FeatureVector, SchemaError> {
    let order = derive_feature_order(numeric_columns, categorical_columns, transform_suffix, |c| {
        record.contains(c)
    });
    gather(record, &order, &BTreeMap::new())
}

fn gather(
    record: &RawRecord,
    order: &[String],
    encodings: &BTreeMap<String, BTreeMap<String, f64>>,
) -> Result<FeatureVector, SchemaError> {
    let mut values = Vec::with_capacity(order.len());
    for name in order {
        let value = match record.get(name) {
            None => return Err(SchemaError::MissingFeature(name.clone())),
            Some(FieldValue::Number(v)) => *v,
            Some(FieldValue::Text(text)) => match encodings.get(name) {
                Some(encoding) => *encoding.get(text).ok_or_else(|| SchemaError::UnknownCategory {
                    column: name.clone(),
                    value: text.clone(),
                })?,
                None => return Err(SchemaError::NotNumeric(name.clone())),
            },
            Some(FieldValue::Other(_)) => return Err(SchemaError::NotNumeric(name.clone())),
        };
        if !value.is_finite() {
            return Err(SchemaError::NonFinite(name.clone()));
        }
        values.push(value);
    }
    Ok(FeatureVector::new(values))
}

fn default_suffix() -> String {
    DEFAULT_LOG_SUFFIX.to_string()
}

/// Training-time schema metadata, persisted alongside the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    /// Numeric columns in training order (sources, not derived names).
    pub numeric_columns: Vec<String>,
    /// Frozen subset of `numeric_columns` that is log-transformed.
    pub skewed_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    #[serde(default = "default_suffix")]
    pub transform_suffix: String,
    /// Text → numeric codes per categorical column.
    #[serde(default)]
    pub categorical_encodings: BTreeMap<String, BTreeMap<String, f64>>,
    /// Model input order, derived once at training time.
    pub feature_order: Vec<String>,
    /// Class index → label.
    pub labels: Vec<String>,
}

impl FeatureSchema {
    /// Build and freeze a schema, deriving `feature_order` from the lists.
    ///
    /// # Errors
    /// Returns error if the lists are inconsistent.
    pub fn freeze(
        numeric_columns: Vec<String>,
        skewed_columns: Vec<String>,
        categorical_columns: Vec<String>,
        categorical_encodings: BTreeMap<String, BTreeMap<String, f64>>,
        labels: Vec<String>,
    ) -> Result<Self, SchemaError> {
        let suffix = default_suffix();
        let skewed: HashSet<String> = skewed_columns
            .iter()
            .map(|c| derived_name(c, &suffix))
            .collect();
        let feature_order =
            derive_feature_order(&numeric_columns, &categorical_columns, &suffix, |c| skewed.contains(c));

        let schema = Self {
            version: SCHEMA_VERSION,
            numeric_columns,
            skewed_columns,
            categorical_columns,
            transform_suffix: suffix,
            categorical_encodings,
            feature_order,
            labels,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check internal consistency, including that the persisted
    /// `feature_order` is what the column lists produce.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.version != SCHEMA_VERSION {
            return Err(SchemaError::UnsupportedVersion(self.version));
        }
        if self.transform_suffix.is_empty() {
            return Err(SchemaError::Invalid("transform_suffix is empty".into()));
        }
        if self.labels.is_empty() {
            return Err(SchemaError::Invalid("labels are empty".into()));
        }

        let mut seen = HashSet::new();
        for column in self.numeric_columns.iter().chain(&self.categorical_columns) {
            if !seen.insert(column.as_str()) {
                return Err(SchemaError::Invalid(format!("column '{column}' listed twice")));
            }
        }
        for column in &self.skewed_columns {
            if !self.numeric_columns.contains(column) {
                return Err(SchemaError::Invalid(format!(
                    "skewed column '{column}' is not a numeric column"
                )));
            }
        }
        for column in self.categorical_encodings.keys() {
            if !self.categorical_columns.contains(column) {
                return Err(SchemaError::Invalid(format!(
                    "encoding given for non-categorical column '{column}'"
                )));
            }
        }

        let derived: HashSet<String> = self
            .skewed_columns
            .iter()
            .map(|c| derived_name(c, &self.transform_suffix))
            .collect();
        let expected = derive_feature_order(
            &self.numeric_columns,
            &self.categorical_columns,
            &self.transform_suffix,
            |c| derived.contains(c),
        );
        if expected != self.feature_order {
            return Err(SchemaError::OrderMismatch {
                expected,
                found: self.feature_order.clone(),
            });
        }
        Ok(())
    }

    /// Transformer for the frozen skewed-column set.
    #[must_use]
    pub fn transformer(&self) -> LogTransformer {
        LogTransformer::new(self.skewed_columns.iter().cloned()).with_suffix(self.transform_suffix.clone())
    }

    /// Gather an already transformed record in frozen order.
    ///
    /// # Errors
    /// Returns error if any frozen feature is missing or unusable.
    pub fn assemble(&self, record: &RawRecord) -> Result<FeatureVector, SchemaError> {
        gather(record, &self.feature_order, &self.categorical_encodings)
    }

    /// Transform then assemble a raw record.
    ///
    /// A skewed column missing from the record is tolerated by the
    /// transform but then fails assembly, since the frozen order needs it.
    ///
    /// # Errors
    /// See [`FeatureSchema::assemble`].
    pub fn prepare(&self, record: &RawRecord) -> Result<FeatureVector, SchemaError> {
        let mut transformed = record.clone();
        self.transformer().apply(&mut transformed)?;
        self.assemble(&transformed)
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_order.len()
    }

    #[must_use]
    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }

    /// Read and validate a schema file.
    ///
    /// # Errors
    /// Returns error if the file is unreadable, malformed or inconsistent.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(format!("{}: {e}", path.display())))?;
        let schema: Self = serde_json::from_str(&content)
            .map_err(|e| SchemaError::Invalid(format!("{}: {e}", path.display())))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Write the schema as pretty JSON.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), SchemaError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| SchemaError::Io(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| SchemaError::Io(format!("{}: {e}", path.display())))
    }
}
