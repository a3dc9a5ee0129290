//! Conventional (mg/dL) to SI unit conversion for lab analytes.
//!
//! Used only on the interactive single-record path; training data is
//! already in SI units.

use std::fmt;
use std::str::FromStr;

/// mg/dL → μmol/L multiplier for creatinine.
pub const CREATININE_UMOL_PER_MG_DL: f64 = 88.4;

/// Errors from unit conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Unrecognized substance '{0}'")]
    UnrecognizedAnalyte(String),
}

/// Target SI unit of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiUnit {
    MillimolePerLitre,
    MicromolePerLitre,
}

impl fmt::Display for SiUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MillimolePerLitre => write!(f, "mmol/L"),
            Self::MicromolePerLitre => write!(f, "μmol/L"),
        }
    }
}

/// How a mg/dL value becomes SI.
///
/// Creatinine is the only multiplier; its target unit (μmol/L) differs from
/// every other analyte (mmol/L).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    DivideBy(f64),
    MultiplyBy(f64),
}

/// Recognized lab analytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Analyte {
    Cholesterol,
    Hdl,
    Ldl,
    Vldl,
    Triglycerides,
    Glucose,
    Urea,
    Creatinine,
}

impl Analyte {
    pub const ALL: [Analyte; 8] = [
        Self::Cholesterol,
        Self::Hdl,
        Self::Ldl,
        Self::Vldl,
        Self::Triglycerides,
        Self::Glucose,
        Self::Urea,
        Self::Creatinine,
    ];

    /// Molar-mass derived conversion constant.
    #[must_use]
    pub fn conversion(self) -> Conversion {
        match self {
            Self::Cholesterol | Self::Hdl | Self::Ldl | Self::Vldl => Conversion::DivideBy(38.67),
            Self::Triglycerides => Conversion::DivideBy(88.57),
            Self::Glucose => Conversion::DivideBy(18.0),
            Self::Urea => Conversion::DivideBy(6.0),
            Self::Creatinine => Conversion::MultiplyBy(CREATININE_UMOL_PER_MG_DL),
        }
    }

    #[must_use]
    pub fn si_unit(self) -> SiUnit {
        match self {
            Self::Creatinine => SiUnit::MicromolePerLitre,
            _ => SiUnit::MillimolePerLitre,
        }
    }

    /// Canonical lookup key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Cholesterol => "chol",
            Self::Hdl => "hdl",
            Self::Ldl => "ldl",
            Self::Vldl => "vldl",
            Self::Triglycerides => "tg",
            Self::Glucose => "glicose",
            Self::Urea => "urea",
            Self::Creatinine => "cr",
        }
    }
}

impl FromStr for Analyte {
    type Err = ConversionError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "colesterol" | "chol" => Ok(Self::Cholesterol),
            "hdl" => Ok(Self::Hdl),
            "ldl" => Ok(Self::Ldl),
            "vldl" => Ok(Self::Vldl),
            "tg" => Ok(Self::Triglycerides),
            "glicose" => Ok(Self::Glucose),
            "urea" => Ok(Self::Urea),
            "creatinina" | "cr" => Ok(Self::Creatinine),
            other => Err(ConversionError::UnrecognizedAnalyte(other.to_string())),
        }
    }
}

impl fmt::Display for Analyte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Convert a mg/dL value to SI, rounded to 2 decimals.
#[must_use]
pub fn convert(analyte: Analyte, value_mg_dl: f64) -> f64 {
    let si = match analyte.conversion() {
        Conversion::DivideBy(factor) => value_mg_dl / factor,
        Conversion::MultiplyBy(factor) => value_mg_dl * factor,
    };
    round2(si)
}

/// Convert by analyte key (`"Chol"`, `" cr "`, ...).
///
/// # Errors
/// Returns `ConversionError::UnrecognizedAnalyte` for keys outside the
/// recognized set; never a number in that case.
pub fn convert_key(key: &str, value_mg_dl: f64) -> Result<f64, ConversionError> {
    let analyte: Analyte = key.parse()?;
    Ok(convert(analyte, value_mg_dl))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
