//! Synthetic starting population used when no baseline distribution is
//! supplied.

use crate::cohort::{CohortState, Sex};
use crate::error::{ensure_finite, DemographyError, DemographyResult};
use crate::models::fertility::BirthSplit;
use crate::models::mortality::MortalityCurve;

/// Total fertility at which the growth proxy is zero.
pub const REPLACEMENT_TFR: f64 = 2.1;
/// Annual growth per unit of TFR above replacement.
pub const GROWTH_PER_TFR: f64 = 0.008;

pub fn growth_rate(tfr: f64) -> f64 {
    (tfr - REPLACEMENT_TFR) * GROWTH_PER_TFR
}

/// Stable-population approximation: the cohort aged `a` is proportional to
/// `exp(-r * a) * l(a)`, with `r` from [`growth_rate`] and `l` the
/// survivorship of each sex, weighted by the sexes' shares of births and
/// scaled to `total_population`.
pub fn stable_population(
    total_population: f64,
    tfr: f64,
    split: &BirthSplit,
    male: &MortalityCurve,
    female: &MortalityCurve,
) -> DemographyResult<CohortState> {
    let total = ensure_finite("population", total_population)?;
    if total < 0.0 {
        return Err(DemographyError::invalid(
            "population",
            format!("{total} is negative"),
        ));
    }
    let r = growth_rate(ensure_finite("tfr", tfr)?);
    let male_share = split.male_fraction();

    let mut state = CohortState::empty();
    for (sex, curve, share) in [
        (Sex::Male, male, male_share),
        (Sex::Female, female, 1.0 - male_share),
    ] {
        let l = curve.survivorship();
        for (age, cell) in state.cohorts_mut(sex).iter_mut().enumerate() {
            *cell = share * (-r * age as f64).exp() * l[age];
        }
    }

    let raw = state.total();
    if raw > 0.0 {
        let scale = total / raw;
        for sex in Sex::ALL {
            state.cohorts_mut(sex).iter_mut().for_each(|cell| *cell *= scale);
        }
    }
    Ok(state)
}
