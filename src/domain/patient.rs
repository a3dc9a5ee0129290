//! Interactive patient form in conventional units.
//!
//! Lab values are entered in mg/dL and converted to SI before they reach
//! the transform, which expects the units the training data was recorded in.

use serde::{Deserialize, Serialize};

use super::record::RawRecord;
use super::units::{convert, Analyte};

/// Patient gender as entered on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    #[default]
    Male,
}

impl Gender {
    /// Training-data code: 1 = male, 0 = female.
    #[must_use]
    pub fn code(self) -> f64 {
        match self {
            Self::Female => 0.0,
            Self::Male => 1.0,
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m" | "male" | "masculino" | "1" => Ok(Self::Male),
            "f" | "female" | "feminino" | "0" => Ok(Self::Female),
            other => Err(format!("Unknown gender '{other}'")),
        }
    }
}

/// Raw form input.
///
/// Lab fields are in mg/dL; HbA1c (%) is carried through unconverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientForm {
    pub gender: Gender,

    /// Age in years (1-120)
    pub age: u32,

    pub urea: f64,
    pub creatinine: f64,
    pub cholesterol: f64,
    pub triglycerides: f64,
    pub hdl: f64,
    pub ldl: f64,
    pub vldl: f64,

    /// Body mass index (kg/m²)
    pub bmi: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hba1c: Option<f64>,
}

impl Default for PatientForm {
    fn default() -> Self {
        Self {
            gender: Gender::Male,
            age: 39,
            urea: 23.0,
            creatinine: 1.05,
            cholesterol: 184.8,
            triglycerides: 115.0,
            hdl: 62.1,
            ldl: 99.7,
            vldl: 23.0,
            bmi: 24.4,
            hba1c: None,
        }
    }
}

impl PatientForm {
    fn labs(&self) -> [(Analyte, &'static str, f64); 7] {
        [
            (Analyte::Urea, "Urea", self.urea),
            (Analyte::Creatinine, "Cr", self.creatinine),
            (Analyte::Cholesterol, "Chol", self.cholesterol),
            (Analyte::Triglycerides, "TG", self.triglycerides),
            (Analyte::Hdl, "HDL", self.hdl),
            (Analyte::Ldl, "LDL", self.ldl),
            (Analyte::Vldl, "VLDL", self.vldl),
        ]
    }

    /// Validate that all inputs are within accepted ranges.
    ///
    /// # Errors
    /// Returns every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(1..=120).contains(&self.age) {
            errors.push(format!("Age {} out of range [1, 120]", self.age));
        }
        for (_, column, value) in self.labs() {
            if !(value.is_finite() && value > 0.0) {
                errors.push(format!("{column} {value} must be a positive number"));
            }
        }
        if !(self.bmi.is_finite() && self.bmi > 0.0 && self.bmi <= 100.0) {
            errors.push(format!("BMI {} out of range (0, 100]", self.bmi));
        }
        if let Some(hba1c) = self.hba1c {
            if !(hba1c.is_finite() && hba1c > 0.0) {
                errors.push(format!("HbA1c {hba1c} must be a positive number"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Record in training column names with SI lab values.
    #[must_use]
    pub fn to_si_record(&self) -> RawRecord {
        let mut record = RawRecord::new()
            .with("Gender", self.gender.code())
            .with("AGE", f64::from(self.age))
            .with("BMI", self.bmi);
        for (analyte, column, value) in self.labs() {
            record.insert(column, convert(analyte, value));
        }
        if let Some(hba1c) = self.hba1c {
            record.insert("HbA1c", hba1c);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_form_converts_to_si() {
        let record = PatientForm::default().to_si_record();
        assert_eq!(record.number("Gender"), Some(1.0));
        assert_eq!(record.number("AGE"), Some(39.0));
        assert_eq!(record.number("Urea"), Some(3.83));
        assert_eq!(record.number("Cr"), Some(92.82));
        assert_eq!(record.number("Chol"), Some(4.78));
        assert_eq!(record.number("TG"), Some(1.3));
        assert_eq!(record.number("HDL"), Some(1.61));
        assert_eq!(record.number("LDL"), Some(2.58));
        assert_eq!(record.number("VLDL"), Some(0.59));
        assert_eq!(record.number("BMI"), Some(24.4));
        assert!(!record.contains("HbA1c"));
    }

    #[test]
    fn test_validation() {
        assert!(PatientForm::default().validate().is_ok());

        let invalid = PatientForm {
            age: 0,
            urea: -1.0,
            bmi: 150.0,
            ..Default::default()
        };
        let errors = invalid.validate().expect_err("invalid");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_gender_parsing() {
        assert_eq!("Feminino".parse::<Gender>(), Ok(Gender::Female));
        assert_eq!(" M ".parse::<Gender>(), Ok(Gender::Male));
        assert!("x".parse::<Gender>().is_err());
        assert_eq!(Gender::Female.code(), 0.0);
    }
}
