use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{DemographyError, DemographyResult};

/// Oldest age bucket; it holds everyone aged 100 and above.
pub const MAX_AGE: usize = 100;
pub const AGE_BUCKETS: usize = MAX_AGE + 1;

/// One value per single-year age bucket, 0..=100.
pub type AgeVector = [f64; AGE_BUCKETS];

pub const CHILD_AGES: RangeInclusive<usize> = 0..=17;
pub const WORKING_AGES: RangeInclusive<usize> = 18..=64;
pub const ELDERLY_AGES: RangeInclusive<usize> = 65..=MAX_AGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub const ALL: [Sex; 2] = [Sex::Male, Sex::Female];
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "male"),
            Sex::Female => write!(f, "female"),
        }
    }
}

/// Age-by-sex population counts.
///
/// Only the simulation engine mutates a state; callers observe it through
/// the snapshots carried by each year's summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortState {
    #[serde(with = "age_vector")]
    male: AgeVector,
    #[serde(with = "age_vector")]
    female: AgeVector,
}

impl Default for CohortState {
    fn default() -> Self {
        Self::empty()
    }
}

impl CohortState {
    pub fn empty() -> Self {
        Self {
            male: [0.0; AGE_BUCKETS],
            female: [0.0; AGE_BUCKETS],
        }
    }

    /// Builds a state from per-age counts, rejecting anything that is not
    /// exactly 101 finite, non-negative entries per sex.
    pub fn from_counts(male: &[f64], female: &[f64]) -> DemographyResult<Self> {
        Ok(Self {
            male: checked_vector("baseline.male", male)?,
            female: checked_vector("baseline.female", female)?,
        })
    }

    pub fn cohorts(&self, sex: Sex) -> &AgeVector {
        match sex {
            Sex::Male => &self.male,
            Sex::Female => &self.female,
        }
    }

    pub(crate) fn cohorts_mut(&mut self, sex: Sex) -> &mut AgeVector {
        match sex {
            Sex::Male => &mut self.male,
            Sex::Female => &mut self.female,
        }
    }

    pub fn get(&self, sex: Sex, age: usize) -> f64 {
        self.cohorts(sex)[age.min(MAX_AGE)]
    }

    /// Places `count` people in a single cell; used to seed test and
    /// scenario populations.
    pub fn with_cohort(mut self, sex: Sex, age: usize, count: f64) -> DemographyResult<Self> {
        if age > MAX_AGE {
            return Err(DemographyError::invalid(
                "age",
                format!("{age} exceeds the terminal age {MAX_AGE}"),
            ));
        }
        if !count.is_finite() || count < 0.0 {
            return Err(DemographyError::invalid(
                "count",
                format!("{count} is not a non-negative count"),
            ));
        }
        self.cohorts_mut(sex)[age] = count;
        Ok(self)
    }

    pub fn total_for(&self, sex: Sex) -> f64 {
        self.cohorts(sex).iter().sum()
    }

    pub fn total(&self) -> f64 {
        self.total_for(Sex::Male) + self.total_for(Sex::Female)
    }

    /// Both sexes summed over an inclusive age range.
    pub fn total_in(&self, ages: RangeInclusive<usize>) -> f64 {
        let lo = *ages.start();
        let hi = (*ages.end()).min(MAX_AGE);
        if lo > hi {
            return 0.0;
        }
        self.male[lo..=hi].iter().sum::<f64>() + self.female[lo..=hi].iter().sum::<f64>()
    }

    /// First cell (in sex, then age order) whose count is negative, NaN or
    /// infinite.
    pub fn first_invalid(&self) -> Option<(Sex, usize, f64)> {
        Sex::ALL.into_iter().find_map(|sex| {
            self.cohorts(sex)
                .iter()
                .enumerate()
                .find(|(_, value)| !(value.is_finite() && **value >= 0.0))
                .map(|(age, value)| (sex, age, *value))
        })
    }

    pub fn age_structure(&self) -> AgeStructure {
        let children = self.total_in(CHILD_AGES);
        let working_age = self.total_in(WORKING_AGES);
        let elderly = self.total_in(ELDERLY_AGES);
        let dependency_ratio = if working_age > 0.0 {
            Some((children + elderly) / working_age)
        } else {
            None
        };
        AgeStructure {
            children,
            working_age,
            elderly,
            dependency_ratio,
        }
    }
}

/// Broad age groups of a cohort state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeStructure {
    pub children: f64,
    pub working_age: f64,
    pub elderly: f64,
    pub dependency_ratio: Option<f64>,
}

fn checked_vector(field: &'static str, values: &[f64]) -> DemographyResult<AgeVector> {
    let vector: AgeVector = values.try_into().map_err(|_| {
        DemographyError::invalid(
            field,
            format!("expected {AGE_BUCKETS} age buckets, got {}", values.len()),
        )
    })?;
    if let Some((age, value)) = vector
        .iter()
        .enumerate()
        .find(|(_, value)| !value.is_finite() || **value < 0.0)
    {
        return Err(DemographyError::invalid(
            field,
            format!("age {age} holds {value}, expected a finite non-negative count"),
        ));
    }
    Ok(vector)
}

/// Serde adapter for fixed-size age vectors (serde stops at 32-element arrays).
pub(crate) mod age_vector {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{AgeVector, AGE_BUCKETS};

    pub fn serialize<S: Serializer>(values: &AgeVector, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AgeVector, D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        let len = values.len();
        let vector: AgeVector = values.try_into().map_err(|_| {
            D::Error::custom(format!("expected {AGE_BUCKETS} age buckets, got {len}"))
        })?;
        if vector.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(D::Error::custom("age buckets must be finite and non-negative"));
        }
        Ok(vector)
    }
}
