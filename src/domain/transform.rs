//! Skew-aware log transform.
//!
//! `log(1 + x)` is written to a derived column named `<column><suffix>`;
//! the source column is left untouched. The same `transform` runs on a
//! single `RawRecord` at serving time and on a whole `Table` while preparing
//! training data. There is deliberately one implementation: the frame types
//! only provide column access.
//!
//! Which columns to transform is decided once, at training time, from the
//! sample skewness of each numeric column. Serving reuses that frozen list.

use super::record::{FieldValue, RawRecord, Table};

/// Suffix appended to a source column to name its transformed counterpart.
pub const DEFAULT_LOG_SUFFIX: &str = "_log";

/// Columns with |skewness| at or above this are log-transformed.
pub const SKEW_THRESHOLD: f64 = 1.0;

/// Errors raised while deriving a transformed column.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Column '{0}' is not numeric")]
    NotNumeric(String),

    #[error("Cannot write derived column '{column}': {reason}")]
    Frame { column: String, reason: String },
}

/// Column access needed by the log transform.
pub trait ColumnFrame {
    fn has_column(&self, name: &str) -> bool;

    /// Write `f(source)` elementwise to `target`, leaving `source` as is.
    ///
    /// # Errors
    /// Returns error if `source` holds non-numeric values.
    fn derive_column(
        &mut self,
        source: &str,
        target: &str,
        f: fn(f64) -> f64,
    ) -> Result<(), TransformError>;
}

impl ColumnFrame for RawRecord {
    fn has_column(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn derive_column(
        &mut self,
        source: &str,
        target: &str,
        f: fn(f64) -> f64,
    ) -> Result<(), TransformError> {
        let value = self
            .number(source)
            .ok_or_else(|| TransformError::NotNumeric(source.to_string()))?;
        self.insert(target, FieldValue::Number(f(value)));
        Ok(())
    }
}

impl ColumnFrame for Table {
    fn has_column(&self, name: &str) -> bool {
        Table::has_column(self, name)
    }

    fn derive_column(
        &mut self,
        source: &str,
        target: &str,
        f: fn(f64) -> f64,
    ) -> Result<(), TransformError> {
        let values: Vec<f64> = self
            .column(source)
            .ok_or_else(|| TransformError::NotNumeric(source.to_string()))?
            .iter()
            .map(|&v| f(v))
            .collect();
        self.set_column(target, values)
            .map_err(|e| TransformError::Frame {
                column: target.to_string(),
                reason: e.to_string(),
            })
    }
}

/// What a transform pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    /// Derived column names written, in request order.
    pub derived: Vec<String>,
    /// Requested columns absent from the input (skipped).
    pub missing: Vec<String>,
}

impl TransformReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Name of the derived column for `column`.
#[must_use]
pub fn derived_name(column: &str, suffix: &str) -> String {
    format!("{column}{suffix}")
}

/// Apply `log(1 + x)` to every requested column present in `frame`.
///
/// Absent columns are skipped with a warning and listed in the report; they
/// never abort the pass.
///
/// # Errors
/// Returns error only if a present column is not numeric.
pub fn transform<F, S>(frame: &mut F, columns: &[S], suffix: &str) -> Result<TransformReport, TransformError>
where
    F: ColumnFrame + ?Sized,
    S: AsRef<str>,
{
    let mut report = TransformReport::default();
    for column in columns {
        let column = column.as_ref();
        if !frame.has_column(column) {
            tracing::warn!("Log transform: column '{}' not found, skipping", column);
            report.missing.push(column.to_string());
            continue;
        }
        let target = derived_name(column, suffix);
        frame.derive_column(column, &target, f64::ln_1p)?;
        report.derived.push(target);
    }
    Ok(report)
}

/// A frozen list of columns to log-transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTransformer {
    columns: Vec<String>,
    suffix: String,
}

impl LogTransformer {
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            suffix: DEFAULT_LOG_SUFFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Transform a record or a table.
    ///
    /// # Errors
    /// See [`transform`].
    pub fn apply<F: ColumnFrame + ?Sized>(&self, frame: &mut F) -> Result<TransformReport, TransformError> {
        transform(frame, &self.columns, &self.suffix)
    }
}

/// Adjusted Fisher–Pearson sample skewness (G1).
///
/// Non-finite values are ignored. Returns `None` with fewer than 3 finite
/// values; a constant column has skewness 0.
#[must_use]
pub fn sample_skewness(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n < 3 {
        return None;
    }
    let n_f = n as f64;
    let mean = finite.iter().sum::<f64>() / n_f;
    let m2 = finite.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n_f;
    let m3 = finite.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n_f;

    // A column of identical values can leave rounding residue in the mean.
    if m2 == 0.0 || m2.sqrt() <= 1e-12 * mean.abs() {
        return Some(0.0);
    }

    let g1 = m3 / m2.powf(1.5);
    Some(g1 * (n_f * (n_f - 1.0)).sqrt() / (n_f - 2.0))
}

/// Candidates (in the given order) whose |skewness| ≥ `threshold`.
///
/// Candidates missing from the table or without a defined skewness are not
/// selected.
#[must_use]
pub fn select_skewed_columns<S: AsRef<str>>(table: &Table, candidates: &[S], threshold: f64) -> Vec<String> {
    candidates
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| {
            table
                .column(name)
                .and_then(sample_skewness)
                .is_some_and(|s| s.abs() >= threshold)
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_gets_parallel_log_column() {
        let mut record = RawRecord::new().with("TG", 1.3).with("AGE", 39);
        let report = transform(&mut record, &["TG"], DEFAULT_LOG_SUFFIX).expect("transform");

        assert_eq!(report.derived, vec!["TG_log".to_string()]);
        assert!(report.is_complete());
        assert_eq!(record.number("TG"), Some(1.3));
        assert_eq!(record.number("TG_log"), Some(1.3f64.ln_1p()));
        assert!(!record.contains("AGE_log"));
    }

    #[test]
    fn test_table_transform_is_elementwise_and_keeps_source() {
        let xs = vec![0.0, 1.0, 2.5, 100.0];
        let mut table = Table::from_columns(vec![("X", xs.clone())]).expect("table");
        LogTransformer::new(["X"]).apply(&mut table).expect("transform");

        assert_eq!(table.column("X").expect("X"), xs.as_slice());
        let logged = table.column("X_log").expect("X_log");
        for (x, l) in xs.iter().zip(logged) {
            assert_eq!(*l, x.ln_1p());
        }
    }

    #[test]
    fn test_absent_column_is_a_noop() {
        let mut record = RawRecord::new().with("AGE", 50);
        let before = record.clone();
        let report = transform(&mut record, &["Urea"], "_log").expect("no error");
        assert_eq!(record, before);
        assert_eq!(report.missing, vec!["Urea".to_string()]);
        assert!(report.derived.is_empty());
    }

    #[test]
    fn test_record_and_table_agree() {
        let values = [3.83, 92.82, 1.3, 1.61];
        let names = ["Urea", "Cr", "TG", "HDL"];
        let transformer = LogTransformer::new(names);

        let mut record: RawRecord = names.iter().copied().zip(values).collect();
        transformer.apply(&mut record).expect("record");

        let mut table =
            Table::from_columns(names.iter().zip(values).map(|(n, v)| (*n, vec![v]))).expect("table");
        transformer.apply(&mut table).expect("table");

        for name in names {
            let derived = derived_name(name, DEFAULT_LOG_SUFFIX);
            assert_eq!(
                record.number(&derived).expect("record value").to_bits(),
                table.column(&derived).expect("table value")[0].to_bits()
            );
        }
    }

    #[test]
    fn test_non_numeric_column_is_rejected() {
        let mut record = RawRecord::new().with("Gender", "M");
        let err = transform(&mut record, &["Gender"], "_log").expect_err("text");
        assert_eq!(err, TransformError::NotNumeric("Gender".into()));
    }

    #[test]
    fn test_custom_suffix() {
        let mut record = RawRecord::new().with("LDL", 2.58);
        LogTransformer::new(["LDL"])
            .with_suffix("__ln1p")
            .apply(&mut record)
            .expect("transform");
        assert!(record.contains("LDL__ln1p"));
    }

    #[test]
    fn test_skewness_values() {
        // Matches the bias-adjusted estimator used by the training pipeline.
        let s = sample_skewness(&[1.0, 1.0, 1.0, 10.0]).expect("defined");
        assert!((s - 2.0).abs() < 1e-9, "got {s}");

        let sym = sample_skewness(&[1.0, 2.0, 3.0, 4.0, 5.0]).expect("defined");
        assert!(sym.abs() < 1e-12);

        assert_eq!(sample_skewness(&[7.0, 7.0, 7.0]), Some(0.0));
        assert_eq!(sample_skewness(&[1.0, 2.0]), None);
        assert!(sample_skewness(&[1.0, f64::NAN, 2.0]).is_none());
    }

    #[test]
    fn test_select_skewed_columns_keeps_candidate_order() {
        let table = Table::from_columns(vec![
            ("flat", vec![1.0, 2.0, 3.0, 4.0]),
            ("right", vec![1.0, 1.0, 1.0, 10.0]),
            ("left", vec![-10.0, 1.0, 1.0, 1.0]),
        ])
        .expect("table");

        let selected = select_skewed_columns(&table, &["left", "flat", "missing", "right"], SKEW_THRESHOLD);
        assert_eq!(selected, vec!["left".to_string(), "right".to_string()]);
    }
}
