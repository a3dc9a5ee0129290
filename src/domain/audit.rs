//! Audit log entry types.
//!
//! One entry is written per prediction attempt, success or failure, and is
//! never mutated afterwards. On disk each entry is one JSON object per line:
//! `request_id`, `route`, `processing_date`, `input`, `output`.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::diagnosis::{Prediction, PredictionError, Severity};
use super::record::RawRecord;

/// What a prediction attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditOutput {
    Prediction {
        prediction: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_index: Option<usize>,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
        status: String,
    },
    /// Any other object, e.g. payloads written by earlier tooling. Kept so
    /// such entries stay queryable.
    Other(serde_json::Value),
}

impl AuditOutput {
    #[must_use]
    pub fn success(prediction: &Prediction) -> Self {
        Self::Prediction {
            prediction: prediction.label.clone(),
            class_index: Some(prediction.class_index),
            status: "success".to_string(),
            message: Some("Prediction completed".to_string()),
        }
    }

    #[must_use]
    pub fn failure(error: &PredictionError) -> Self {
        Self::Error {
            error: error.to_string(),
            severity: Some(error.severity()),
            status: "error".to_string(),
        }
    }

    #[must_use]
    pub fn from_result(result: &Result<Prediction, PredictionError>) -> Self {
        match result {
            Ok(p) => Self::success(p),
            Err(e) => Self::failure(e),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Prediction { .. })
    }
}

/// Immutable record of one prediction request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique identifier
    pub request_id: String,

    pub route: String,

    /// Processing timestamp, with the offset it was recorded in.
    #[serde(serialize_with = "serialize_timestamp", deserialize_with = "deserialize_timestamp")]
    pub processing_date: DateTime<FixedOffset>,

    pub input: RawRecord,

    pub output: AuditOutput,
}

impl AuditLogEntry {
    /// Create an entry with explicit id and timestamp.
    #[must_use]
    pub fn at(
        request_id: impl Into<String>,
        route: impl Into<String>,
        processing_date: impl Into<DateTime<FixedOffset>>,
        input: RawRecord,
        output: AuditOutput,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            route: route.into(),
            processing_date: processing_date.into(),
            input,
            output,
        }
    }

    /// `YYYY-MM-DD` part of the processing timestamp, in its own offset.
    #[must_use]
    pub fn date(&self) -> String {
        self.processing_date.format("%Y-%m-%d").to_string()
    }

    /// Date-only comparison; the time of day is ignored.
    #[must_use]
    pub fn matches_date(&self, date: &str) -> bool {
        self.date() == date.trim()
    }

    #[must_use]
    pub fn matches_route(&self, route: &str) -> bool {
        self.route == route
    }

    /// AND of both filters; an absent filter matches everything.
    #[must_use]
    pub fn matches(&self, date: Option<&str>, route: Option<&str>) -> bool {
        date.map_or(true, |d| self.matches_date(d)) && route.map_or(true, |r| self.matches_route(r))
    }
}

/// Full sub-second precision, so an entry reads back equal to what was
/// written.
fn serialize_timestamp<S: Serializer>(ts: &DateTime<FixedOffset>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Accepts RFC 3339 (offset kept) and offset-less ISO-8601 (read as UTC),
/// so logs written by earlier tooling remain queryable.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<FixedOffset>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc().fixed_offset())
        .map_err(|e| serde::de::Error::custom(format!("invalid processing_date '{raw}': {e}")))
}

/// Generate a random UUID v4 for request ids.
///
/// Uses ChaCha20Rng seeded from OS entropy so ids are unpredictable.
#[must_use]
pub fn new_request_id() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let bytes: [u8; 16] = rng.gen();

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        (bytes[6] & 0x0f) | 0x40, bytes[7],
        (bytes[8] & 0x3f) | 0x80, bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
