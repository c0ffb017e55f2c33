use serde::Serialize;

use crate::cohort::{AgeVector, CohortState, Sex, AGE_BUCKETS, MAX_AGE};
use crate::config::FertilityConfig;
use crate::error::{ensure_finite, DemographyError, DemographyResult};

/// Age-specific fertility rates, zero outside the childbearing band.
#[derive(Debug, Clone, PartialEq)]
pub struct FertilityCurve {
    asfr: AgeVector,
    tfr: f64,
    min_age: usize,
    max_age: usize,
}

impl FertilityCurve {
    pub fn rate(&self, age: usize) -> f64 {
        self.asfr[age.min(MAX_AGE)]
    }

    pub fn rates(&self) -> &AgeVector {
        &self.asfr
    }

    pub fn tfr(&self) -> f64 {
        self.tfr
    }

    pub fn childbearing_ages(&self) -> std::ops::RangeInclusive<usize> {
        self.min_age..=self.max_age
    }

    /// Births during one year to the female cohorts of `state`, read at the
    /// ages they held when the year started.
    pub fn births(&self, state: &CohortState) -> f64 {
        self.births_with_offset(state, 0)
    }

    /// As [`Self::births`], for a state whose cohorts have already been aged
    /// `offset` years: the woman in bucket `a + offset` is charged `ASFR(a)`.
    pub fn births_with_offset(&self, state: &CohortState, offset: usize) -> f64 {
        let female = state.cohorts(Sex::Female);
        self.childbearing_ages()
            .filter(|age| age + offset <= MAX_AGE)
            .map(|age| female[age + offset] * self.asfr[age])
            .sum()
    }
}

/// Splits births by sex from the sex ratio at birth (males per 100 females).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BirthSplit {
    sex_ratio_at_birth: f64,
}

impl BirthSplit {
    pub fn new(sex_ratio_at_birth: f64) -> DemographyResult<Self> {
        let srb = ensure_finite("sex_ratio_at_birth", sex_ratio_at_birth)?;
        if srb <= 0.0 {
            return Err(DemographyError::invalid(
                "sex_ratio_at_birth",
                format!("{srb} must be positive"),
            ));
        }
        Ok(Self {
            sex_ratio_at_birth: srb,
        })
    }

    pub fn male_fraction(&self) -> f64 {
        self.sex_ratio_at_birth / (100.0 + self.sex_ratio_at_birth)
    }

    /// Returns `(male, female)`; the female share is the remainder of
    /// `total`.
    pub fn split(&self, total: f64) -> (f64, f64) {
        let male = total * self.male_fraction();
        (male, total - male)
    }
}

#[derive(Debug, Clone)]
pub struct FertilityModel {
    config: FertilityConfig,
}

impl FertilityModel {
    pub fn new(config: FertilityConfig) -> DemographyResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Relative weight of each childbearing age: a Beta(a, b) density
    /// evaluated on the band mapped onto [0, 1], normalised to sum to one.
    pub fn weights(&self) -> AgeVector {
        let FertilityConfig {
            shape_a,
            shape_b,
            min_age,
            max_age,
        } = self.config;
        let span = (max_age - min_age) as f64;
        let mut weights = [0.0; AGE_BUCKETS];
        for age in min_age..=max_age {
            let t = (age - min_age) as f64 / span;
            weights[age] = t.powf(shape_a - 1.0) * (1.0 - t).powf(shape_b - 1.0);
        }
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        }
        weights
    }

    pub fn derive(
        &self,
        tfr: f64,
        sex_ratio_at_birth: f64,
    ) -> DemographyResult<(FertilityCurve, BirthSplit)> {
        let tfr = ensure_finite("tfr", tfr)?;
        if tfr < 0.0 {
            return Err(DemographyError::invalid("tfr", format!("{tfr} is negative")));
        }
        let split = BirthSplit::new(sex_ratio_at_birth)?;

        let mut asfr = self.weights();
        asfr.iter_mut().for_each(|rate| *rate *= tfr);

        let curve = FertilityCurve {
            asfr,
            tfr,
            min_age: self.config.min_age,
            max_age: self.config.max_age,
        };
        Ok((curve, split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> FertilityModel {
        FertilityModel::new(FertilityConfig::default()).unwrap()
    }

    #[test]
    fn rates_sum_to_tfr_inside_band() {
        let (curve, _) = model().derive(1.8, 105.0).unwrap();
        let total: f64 = curve.rates().iter().sum();
        assert!((total - 1.8).abs() < 1e-12);
        assert_eq!(curve.rate(14), 0.0);
        assert_eq!(curve.rate(50), 0.0);
        // Beta(2,5) puts the first band age at zero weight
        assert_eq!(curve.rate(15), 0.0);
    }

    #[test]
    fn schedule_peaks_in_the_twenties() {
        let (curve, _) = model().derive(2.0, 105.0).unwrap();
        let peak = (0..AGE_BUCKETS)
            .max_by(|a, b| curve.rate(*a).total_cmp(&curve.rate(*b)))
            .unwrap();
        assert!((20..=29).contains(&peak), "peak at {peak}");
    }

    #[test]
    fn split_follows_sex_ratio() {
        let split = BirthSplit::new(105.0).unwrap();
        let (male, female) = split.split(2050.0);
        assert!((male - 1050.0).abs() < 1e-9);
        assert!((male + female - 2050.0).abs() < 1e-9);
    }

    #[test]
    fn births_use_start_of_year_ages() {
        let (curve, _) = model().derive(2.0, 105.0).unwrap();
        let state = CohortState::empty()
            .with_cohort(Sex::Female, 25, 1000.0)
            .unwrap()
            .with_cohort(Sex::Male, 25, 1000.0)
            .unwrap();
        assert!((curve.births(&state) - 1000.0 * curve.rate(25)).abs() < 1e-9);

        let aged = CohortState::empty()
            .with_cohort(Sex::Female, 26, 1000.0)
            .unwrap();
        assert!((curve.births_with_offset(&aged, 1) - curve.births(&state)).abs() < 1e-9);
    }

    #[test]
    fn rejects_negative_tfr_and_bad_ratio() {
        assert!(model().derive(-0.1, 105.0).unwrap_err().is_invalid_parameter());
        assert!(model().derive(2.0, 0.0).is_err());
        assert!(model().derive(f64::INFINITY, 105.0).is_err());
    }

    #[test]
    fn zero_tfr_yields_no_births() {
        let (curve, _) = model().derive(0.0, 105.0).unwrap();
        let state = CohortState::empty()
            .with_cohort(Sex::Female, 30, 1000.0)
            .unwrap();
        assert_eq!(curve.births(&state), 0.0);
    }

    #[test]
    fn rejects_malformed_childbearing_band() {
        let inverted = FertilityConfig {
            min_age: 49,
            max_age: 15,
            ..FertilityConfig::default()
        };
        assert!(FertilityModel::new(inverted).unwrap_err().is_invalid_parameter());

        let beyond_terminal = FertilityConfig {
            max_age: 120,
            ..FertilityConfig::default()
        };
        assert!(FertilityModel::new(beyond_terminal).unwrap_err().is_invalid_parameter());
    }
}
