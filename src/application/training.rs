//! Training-time dataset preparation.
//!
//! Produces the frozen `FeatureSchema` and the training matrix using the
//! same log transform and order derivation the prediction service uses, so
//! the two can never drift apart:
//!
//! 1. drop identifier columns
//! 2. encode categorical columns and the target
//! 3. remove duplicate rows (first occurrence kept)
//! 4. select numeric columns with |skewness| at or above the threshold
//! 5. log-transform them, derive the order once, drop excluded features

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::domain::{
    derive_feature_order, sample_skewness, select_skewed_columns, FeatureSchema, FeatureVector,
    LogTransformer, SchemaError, Table, TableError, TransformError, DEFAULT_LOG_SUFFIX, SKEW_THRESHOLD,
};

/// Errors raised while preparing training data.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Failed to read dataset {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Dataset has no rows")]
    Empty,

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Unknown value '{value}' in column '{column}' (row {row})")]
    UnknownValue { column: String, value: String, row: usize },

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Preparation settings. Defaults match the diabetes dataset.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub target_column: String,
    /// Columns dropped before anything else.
    pub id_columns: Vec<String>,
    /// Numeric columns left out of the model input.
    pub excluded_features: Vec<String>,
    pub skew_threshold: f64,
    /// Text → code per categorical column.
    pub categorical_encodings: BTreeMap<String, BTreeMap<String, f64>>,
    /// Target text (trimmed) → class index.
    pub target_encoding: BTreeMap<String, usize>,
    /// Class index → label.
    pub labels: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let gender: BTreeMap<String, f64> = [("F", 0.0), ("M", 1.0), ("f", 0.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            target_column: "CLASS".into(),
            id_columns: vec!["ID".into(), "No_Pation".into()],
            excluded_features: vec!["HbA1c".into()],
            skew_threshold: SKEW_THRESHOLD,
            categorical_encodings: BTreeMap::from([("Gender".to_string(), gender)]),
            target_encoding: [("Y", 0), ("N", 1), ("P", 2)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            labels: vec!["Diabético".into(), "Não-Diabético".into(), "Pré-Diabético".into()],
        }
    }
}

/// A raw dataset: numeric columns in a `Table`, everything else as text.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Header order of the source file.
    pub columns: Vec<String>,
    pub numeric: Table,
    pub text: BTreeMap<String, Vec<String>>,
}

impl Dataset {
    /// Load a CSV file with a header row.
    ///
    /// A column is numeric when every non-empty cell parses as a number;
    /// empty numeric cells become NaN.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or has no rows.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let csv_err = |source| TrainingError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(csv_err)?;
        let headers: Vec<String> = reader.headers().map_err(csv_err)?.iter().map(str::to_string).collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(record.get(i).unwrap_or_default().to_string());
            }
        }
        Self::from_cells(headers, cells)
    }

    /// Build a dataset from header names and column-major cells.
    ///
    /// # Errors
    /// Returns error if there are no rows or the columns are ragged.
    pub fn from_cells(headers: Vec<String>, cells: Vec<Vec<String>>) -> Result<Self, TrainingError> {
        if cells.first().map_or(true, Vec::is_empty) {
            return Err(TrainingError::Empty);
        }

        let mut numeric = Table::default();
        let mut text = BTreeMap::new();
        for (name, column) in headers.iter().zip(cells) {
            let parsed: Option<Vec<f64>> = column
                .iter()
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        Some(f64::NAN)
                    } else {
                        cell.parse::<f64>().ok()
                    }
                })
                .collect();
            match parsed {
                Some(values) => numeric.push_column(name.clone(), values)?,
                None => {
                    text.insert(name.clone(), column);
                }
            }
        }

        tracing::debug!(
            "Loaded dataset: {} rows, {} numeric and {} text columns",
            numeric.n_rows().max(text.values().next().map_or(0, Vec::len)),
            numeric.n_columns(),
            text.len()
        );
        Ok(Self {
            columns: headers,
            numeric,
            text,
        })
    }
}

/// Output of [`prepare`].
#[derive(Debug, Clone)]
pub struct PreparedTraining {
    pub schema: FeatureSchema,
    /// Rows in the schema's frozen order.
    pub features: Vec<FeatureVector>,
    pub targets: Vec<usize>,
    /// Skewness of every numeric column, in column order.
    pub skewness: Vec<(String, Option<f64>)>,
    pub duplicates_removed: usize,
}

fn encode_column<T: Copy>(
    column: &str,
    values: &[String],
    encoding: &BTreeMap<String, T>,
    trim: bool,
) -> Result<Vec<T>, TrainingError> {
    values
        .iter()
        .enumerate()
        .map(|(row, raw)| {
            let key = if trim { raw.trim() } else { raw.as_str() };
            encoding.get(key).copied().ok_or_else(|| TrainingError::UnknownValue {
                column: column.to_string(),
                value: raw.clone(),
                row: row + 1,
            })
        })
        .collect()
}

/// Prepare a dataset for training and freeze its schema.
///
/// # Errors
/// Returns error on missing columns, unknown categories or target values,
/// or an inconsistent schema.
pub fn prepare(dataset: &Dataset, config: &TrainingConfig) -> Result<PreparedTraining, TrainingError> {
    let target = config.target_column.as_str();
    let dropped: HashSet<&str> = config.id_columns.iter().map(String::as_str).collect();
    let kept = |c: &&String| !dropped.contains(c.as_str()) && c.as_str() != target;

    // Numeric and categorical lists are fixed from the raw dtypes, before
    // any encoding turns categories into numbers.
    let numeric_columns: Vec<String> = dataset
        .columns
        .iter()
        .filter(kept)
        .filter(|c| dataset.numeric.has_column(c))
        .cloned()
        .collect();
    let categorical_columns: Vec<String> = dataset
        .columns
        .iter()
        .filter(kept)
        .filter(|c| dataset.text.contains_key(*c))
        .cloned()
        .collect();

    let mut table = Table::default();
    for name in &numeric_columns {
        let values = dataset
            .numeric
            .column(name)
            .ok_or_else(|| TrainingError::MissingColumn(name.clone()))?;
        table.push_column(name.clone(), values.to_vec())?;
    }
    for name in &categorical_columns {
        let encoding = config
            .categorical_encodings
            .get(name)
            .ok_or_else(|| TrainingError::MissingColumn(format!("{name} (no encoding configured)")))?;
        let codes = encode_column(name, &dataset.text[name], encoding, false)?;
        table.push_column(name.clone(), codes)?;
    }

    let target_values: Vec<String> = match (dataset.text.get(target), dataset.numeric.column(target)) {
        (Some(text), _) => text.clone(),
        (None, Some(numbers)) => numbers.iter().map(|v| v.to_string()).collect(),
        (None, None) => return Err(TrainingError::MissingColumn(target.to_string())),
    };
    let classes = encode_column(target, &target_values, &config.target_encoding, true)?;
    table.push_column(target, classes.iter().map(|&c| c as f64).collect())?;

    let duplicates_removed = table.dedup_rows();
    tracing::info!(
        "Removed {} duplicate rows, {} remain",
        duplicates_removed,
        table.n_rows()
    );

    let skewness: Vec<(String, Option<f64>)> = numeric_columns
        .iter()
        .map(|c| (c.clone(), table.column(c).and_then(sample_skewness)))
        .collect();
    let skewed = select_skewed_columns(&table, &numeric_columns, config.skew_threshold);
    tracing::info!("Log-transforming skewed columns: {:?}", skewed);

    LogTransformer::new(skewed.iter().cloned()).apply(&mut table)?;
    let derived_order = derive_feature_order(&numeric_columns, &categorical_columns, DEFAULT_LOG_SUFFIX, |c| {
        table.has_column(c)
    });

    let excluded: HashSet<&str> = config.excluded_features.iter().map(String::as_str).collect();
    let model_numeric: Vec<String> = numeric_columns
        .iter()
        .filter(|c| !excluded.contains(c.as_str()))
        .cloned()
        .collect();
    let model_skewed: Vec<String> = skewed
        .into_iter()
        .filter(|c| !excluded.contains(c.as_str()))
        .collect();
    let encodings = config
        .categorical_encodings
        .iter()
        .filter(|(column, _)| categorical_columns.contains(column))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let schema = FeatureSchema::freeze(
        model_numeric,
        model_skewed,
        categorical_columns,
        encodings,
        config.labels.clone(),
    )?;

    let excluded_derived: HashSet<String> = config
        .excluded_features
        .iter()
        .map(|c| format!("{c}{DEFAULT_LOG_SUFFIX}"))
        .collect();
    let expected: Vec<&String> = derived_order
        .iter()
        .filter(|c| !excluded.contains(c.as_str()) && !excluded_derived.contains(*c))
        .collect();
    if expected.len() != schema.feature_order.len() || expected.iter().zip(&schema.feature_order).any(|(a, b)| *a != b) {
        return Err(SchemaError::OrderMismatch {
            expected: expected.into_iter().cloned().collect(),
            found: schema.feature_order.clone(),
        }
        .into());
    }

    let columns: Vec<&[f64]> = schema
        .feature_order
        .iter()
        .map(|c| table.column(c).ok_or_else(|| TrainingError::MissingColumn(c.clone())))
        .collect::<Result<_, _>>()?;
    let target_column = table
        .column(target)
        .ok_or_else(|| TrainingError::MissingColumn(target.to_string()))?;

    let features = (0..table.n_rows())
        .map(|r| FeatureVector::new(columns.iter().map(|c| c[r]).collect()))
        .collect();
    let targets = target_column.iter().map(|&v| v as usize).collect();

    tracing::info!(
        "Prepared {} rows with frozen order {:?}",
        table.n_rows(),
        schema.feature_order
    );

    Ok(PreparedTraining {
        schema,
        features,
        targets,
        skewness,
        duplicates_removed,
    })
}

impl PreparedTraining {
    /// Write the training matrix (frozen order, then the target) as CSV.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn write_matrix_csv<P: AsRef<Path>>(&self, path: P, target_column: &str) -> Result<(), TrainingError> {
        let path = path.as_ref();
        let csv_err = |source| TrainingError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;

        let mut header: Vec<&str> = self.schema.feature_order.iter().map(String::as_str).collect();
        header.push(target_column);
        writer.write_record(&header).map_err(csv_err)?;

        for (row, target) in self.features.iter().zip(&self.targets) {
            let mut fields: Vec<String> = row.as_slice().iter().map(f64::to_string).collect();
            fields.push(target.to_string());
            writer.write_record(&fields).map_err(csv_err)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
ID,No_Pation,Gender,AGE,Urea,Cr,HbA1c,Chol,TG,HDL,LDL,VLDL,BMI,CLASS
1,100,F,50,4.7,46,4.9,4.2,0.9,2.4,1.4,0.5,24,N
2,101,M,26,4.5,62,4.9,3.7,1.4,1.1,2.1,0.6,23,N
3,102,F,50,4.7,46,4.9,4.2,0.9,2.4,1.4,0.5,24,N
4,103,M,55,5.0,70,8.0,5.0,2.1,1.0,3.0,0.9,30,Y 
5,104,f,60,20.0,800,9.0,4.8,9.0,1.2,2.9,4.0,35,Y
6,105,M,45,4.0,60,6.0,4.4,1.8,1.3,2.7,0.7,27,P
";

    fn dataset(dir: &Path) -> Dataset {
        let path = dir.join("diabetes.csv");
        std::fs::write(&path, CSV).expect("write");
        Dataset::from_csv(&path).expect("load")
    }

    #[test]
    fn test_dataset_splits_numeric_and_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ds = dataset(dir.path());
        assert!(ds.numeric.has_column("AGE"));
        assert!(ds.text.contains_key("Gender"));
        assert!(ds.text.contains_key("CLASS"));
        assert_eq!(ds.numeric.n_rows(), 6);
    }

    #[test]
    fn test_prepare_freezes_schema_and_matrix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prepared = prepare(&dataset(dir.path()), &TrainingConfig::default()).expect("prepare");

        assert_eq!(prepared.duplicates_removed, 1);
        assert_eq!(prepared.features.len(), 5);
        assert_eq!(prepared.targets, vec![1, 1, 0, 0, 2]);

        let schema = &prepared.schema;
        schema.validate().expect("consistent");
        assert!(!schema.numeric_columns.contains(&"HbA1c".to_string()));
        assert!(!schema.feature_order.iter().any(|c| c.starts_with("HbA1c")));
        assert!(!schema.feature_order.iter().any(|c| c == "ID" || c == "No_Pation" || c == "CLASS"));
        assert_eq!(schema.categorical_columns, vec!["Gender".to_string()]);
        assert_eq!(schema.feature_order.last().map(String::as_str), Some("Gender"));
        assert!(schema.skewed_columns.contains(&"Cr".to_string()));
        assert!(schema.feature_order.contains(&"Cr_log".to_string()));
        assert!(!schema.feature_order.contains(&"Cr".to_string()));

        for row in &prepared.features {
            assert_eq!(row.len(), schema.n_features());
        }
    }

    #[test]
    fn test_training_rows_match_serving_assembly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ds = dataset(dir.path());
        let prepared = prepare(&ds, &TrainingConfig::default()).expect("prepare");

        // Row 2 of the file (index 1) survives deduplication at index 1.
        let mut record = crate::domain::RawRecord::new().with("Gender", "M");
        for name in &prepared.schema.numeric_columns {
            record.insert(name.clone(), ds.numeric.column(name).expect("column")[1]);
        }
        let served = prepared.schema.prepare(&record).expect("assemble");
        assert_eq!(served.to_le_bytes(), prepared.features[1].to_le_bytes());
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let ds = Dataset::from_cells(
            vec!["AGE".into(), "CLASS".into()],
            vec![vec!["1".into(), "2".into()], vec!["Y".into(), "Q".into()]],
        )
        .expect("dataset");
        let err = prepare(&ds, &TrainingConfig::default()).expect_err("unknown class");
        assert!(matches!(err, TrainingError::UnknownValue { row: 2, .. }));
    }

    #[test]
    fn test_write_matrix_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let prepared = prepare(&dataset(dir.path()), &TrainingConfig::default()).expect("prepare");
        let out = dir.path().join("matrix.csv");
        prepared.write_matrix_csv(&out, "CLASS").expect("write");

        let content = std::fs::read_to_string(&out).expect("read");
        let header = content.lines().next().expect("header");
        assert_eq!(header, format!("{},CLASS", prepared.schema.feature_order.join(",")));
        assert_eq!(content.lines().count(), 1 + prepared.features.len());
    }
}
