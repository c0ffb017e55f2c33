use thiserror::Error;

use crate::cohort::Sex;

/// Errors that abort the operation that raised them.
///
/// Calibration that misses its tolerance, migration shortfalls and
/// accounting drift are not errors: they travel inside the reports the
/// engine returns.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DemographyError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("invalid cohort in year {year}: {sex} aged {age} holds {value}")]
    InvariantViolation {
        year: i32,
        age: usize,
        sex: Sex,
        value: f64,
    },
}

impl DemographyError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DemographyError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, DemographyError::InvalidParameter { .. })
    }
}

pub type DemographyResult<T> = Result<T, DemographyError>;

/// Rejects NaN/infinite inputs with a parameter error.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> DemographyResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DemographyError::invalid(field, format!("{value} is not finite")))
    }
}
