//! Record, table and feature-vector types.
//!
//! A `RawRecord` is one patient as handed over by a caller. A `Table` is the
//! columnar frame used while preparing training data. Both implement
//! `ColumnFrame`, which is what the log transform operates on.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// A single attribute value: lab measurements are numeric, some
/// attributes (e.g. Gender as `"M"`/`"F"`) arrive as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    /// `null`, booleans or nested values. Never a model input, but kept so
    /// audited inputs read back as written.
    Other(serde_json::Value),
}

impl FieldValue {
    /// Numeric value, if this field is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) | Self::Other(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Mapping from attribute name to value for one request.
///
/// Serialized as a flat JSON object, e.g. `{"AGE": 39, "Urea": 3.83}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl RawRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Numeric value of a field, `None` if absent or textual.
    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_number)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Errors raised while building or reshaping a `Table`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
}

/// Column-major numeric frame used for bulk (training-time) preparation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl Table {
    /// Build a table from `(name, values)` pairs, preserving column order.
    ///
    /// # Errors
    /// Returns error if column lengths differ or a name repeats.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
        Ok(table)
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    /// Column names in table order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    /// Append a new column.
    ///
    /// # Errors
    /// Returns error on a length mismatch or an existing name.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), TableError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if self.names.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(TableError::RaggedColumn {
                column: name,
                expected: self.n_rows,
                actual: values.len(),
            });
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Insert a column, replacing the values of an existing one in place.
    ///
    /// # Errors
    /// Returns error on a length mismatch.
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), TableError> {
        let name = name.into();
        match self.position(&name) {
            Some(i) => {
                if values.len() != self.n_rows {
                    return Err(TableError::RaggedColumn {
                        column: name,
                        expected: self.n_rows,
                        actual: values.len(),
                    });
                }
                self.columns[i] = values;
                Ok(())
            }
            None => self.push_column(name, values),
        }
    }

    /// Drop rows that repeat an earlier row across every column.
    ///
    /// First occurrences are kept in their original order. Values are
    /// compared bitwise, so two NaNs in the same column compare equal.
    /// Returns the number of rows removed.
    pub fn dedup_rows(&mut self) -> usize {
        let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(self.n_rows);
        let keep: Vec<bool> = (0..self.n_rows)
            .map(|r| {
                let key: Vec<u64> = self.columns.iter().map(|c| c[r].to_bits()).collect();
                seen.insert(key)
            })
            .collect();

        let removed = keep.iter().filter(|k| !**k).count();
        if removed == 0 {
            return 0;
        }

        for column in &mut self.columns {
            let mut idx = 0;
            column.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
        }
        self.n_rows -= removed;
        removed
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Ordered numeric model input.
///
/// The order is the frozen schema's `feature_order`; the vector itself
/// carries no names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Little-endian byte image of the vector, used to compare assemblies
    /// bit for bit.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}
