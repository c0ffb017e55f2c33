//! Gompertz-Makeham mortality calibrated to a target life expectancy.
//!
//! The hazard at age `a` is `alpha + beta * exp(gamma * a)`. `alpha` and
//! `gamma` come from [`MortalityConfig`]; `beta` is searched so that the life
//! table built from the resulting curve reproduces the target life
//! expectancy at birth.

use std::collections::HashMap;

use serde::Serialize;

use crate::cohort::{AgeVector, AGE_BUCKETS, MAX_AGE};
use crate::config::{MortalityConfig, TerminalPolicy};
use crate::error::{ensure_finite, DemographyError, DemographyResult};

/// Survivors to exact age `a` out of one birth, for `a` in 0..=101.
pub type Survivorship = [f64; AGE_BUCKETS + 1];

/// Outcome of the beta search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub target_life_expectancy: f64,
    pub implied_life_expectancy: f64,
    pub beta: f64,
    pub iterations: u32,
    pub converged: bool,
}

impl Calibration {
    /// The closest curve found did not reach the tolerance.
    pub fn is_approximate(&self) -> bool {
        !self.converged
    }
}

/// Annual death probabilities by age for one sex.
#[derive(Debug, Clone, PartialEq)]
pub struct MortalityCurve {
    q: AgeVector,
    multiplier: f64,
    calibration: Calibration,
}

impl MortalityCurve {
    pub fn probability(&self, age: usize) -> f64 {
        self.q[age.min(MAX_AGE)]
    }

    pub fn probabilities(&self) -> &AgeVector {
        &self.q
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn survivorship(&self) -> Survivorship {
        survivorship(&self.q)
    }

    /// Life expectancy at birth of this curve, multiplier included.
    pub fn life_expectancy(&self) -> f64 {
        life_expectancy(&self.q)
    }
}

pub fn survivorship(q: &AgeVector) -> Survivorship {
    let mut l = [0.0; AGE_BUCKETS + 1];
    l[0] = 1.0;
    for age in 0..AGE_BUCKETS {
        l[age + 1] = l[age] * (1.0 - q[age]);
    }
    l
}

/// Person-years lived per birth, with deaths spread evenly over each year
/// of age: `sum over a of (l(a) + l(a + 1)) / 2`.
pub fn life_expectancy(q: &AgeVector) -> f64 {
    let l = survivorship(q);
    l.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])).sum()
}

#[derive(Debug, Clone)]
pub struct MortalityModel {
    config: MortalityConfig,
}

impl MortalityModel {
    pub fn new(config: MortalityConfig) -> DemographyResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MortalityConfig {
        &self.config
    }

    pub fn hazard(&self, beta: f64, age: usize) -> f64 {
        self.config.alpha + beta * (self.config.gamma * age as f64).exp()
    }

    /// Calibrates `beta` against `target_life_expectancy` at multiplier 1,
    /// then scales the curve by `multiplier`.
    ///
    /// Missing the tolerance is not an error: the closest curve is returned
    /// with [`Calibration::converged`] unset.
    pub fn calibrate(
        &self,
        target_life_expectancy: f64,
        multiplier: f64,
    ) -> DemographyResult<MortalityCurve> {
        let target = ensure_finite("life_expectancy", target_life_expectancy)?;
        if target <= 0.0 {
            return Err(DemographyError::invalid(
                "life_expectancy",
                format!("{target} must be positive"),
            ));
        }
        let multiplier = ensure_finite("mortality_multiplier", multiplier)?;
        if multiplier < 0.0 {
            return Err(DemographyError::invalid(
                "mortality_multiplier",
                format!("{multiplier} must not be negative"),
            ));
        }

        let calibration = self.search_beta(target);
        Ok(MortalityCurve {
            q: self.curve_for_beta(calibration.beta, multiplier),
            multiplier,
            calibration,
        })
    }

    // Life expectancy falls monotonically as beta grows, so bisect in log space.
    fn search_beta(&self, target: f64) -> Calibration {
        let mut lo = self.config.beta_min.ln();
        let mut hi = self.config.beta_max.ln();
        let mut best: Option<(f64, f64)> = None;

        for iteration in 1..=self.config.max_iterations {
            let log_beta = 0.5 * (lo + hi);
            let beta = log_beta.exp();
            let implied = life_expectancy(&self.curve_for_beta(beta, 1.0));

            let closer = best.map_or(true, |(_, e)| (implied - target).abs() < (e - target).abs());
            if closer {
                best = Some((beta, implied));
            }
            if (implied - target).abs() <= self.config.tolerance_years {
                return Calibration {
                    target_life_expectancy: target,
                    implied_life_expectancy: implied,
                    beta,
                    iterations: iteration,
                    converged: true,
                };
            }
            if implied > target {
                lo = log_beta;
            } else {
                hi = log_beta;
            }
        }

        // max_iterations >= 1, so at least one candidate was evaluated
        let (beta, implied) = best.unwrap_or((self.config.beta_min, f64::NAN));
        Calibration {
            target_life_expectancy: target,
            implied_life_expectancy: implied,
            beta,
            iterations: self.config.max_iterations,
            converged: false,
        }
    }

    fn curve_for_beta(&self, beta: f64, multiplier: f64) -> AgeVector {
        let ceiling = self.config.max_death_probability;
        let mut q = [0.0; AGE_BUCKETS];
        for (age, slot) in q.iter_mut().enumerate() {
            let base = 1.0 - (-self.hazard(beta, age)).exp();
            *slot = (base * multiplier).clamp(0.0, ceiling);
        }
        if self.config.terminal == TerminalPolicy::FullAttrition {
            q[MAX_AGE] = 1.0;
        }
        q
    }
}

/// Memoises calibrated curves by (life expectancy, multiplier).
#[derive(Debug, Clone)]
pub struct MortalityCache {
    model: MortalityModel,
    curves: HashMap<(u64, u64), MortalityCurve>,
}

impl MortalityCache {
    pub fn new(model: MortalityModel) -> Self {
        Self {
            model,
            curves: HashMap::new(),
        }
    }

    pub fn get_or_calibrate(
        &mut self,
        life_expectancy: f64,
        multiplier: f64,
    ) -> DemographyResult<MortalityCurve> {
        let key = (life_expectancy.to_bits(), multiplier.to_bits());
        if let Some(curve) = self.curves.get(&key) {
            return Ok(curve.clone());
        }
        let curve = self.model.calibrate(life_expectancy, multiplier)?;
        self.curves.insert(key, curve.clone());
        Ok(curve)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> MortalityModel {
        MortalityModel::new(MortalityConfig::default()).unwrap()
    }

    #[test]
    fn calibration_reaches_targets() {
        for target in [40.0, 55.0, 70.0, 80.0, 90.0] {
            let curve = model().calibrate(target, 1.0).unwrap();
            assert!(curve.calibration().converged, "target {target}");
            assert!(
                (curve.life_expectancy() - target).abs() < 0.1,
                "target {target} gave {}",
                curve.life_expectancy()
            );
        }
    }

    #[test]
    fn probabilities_are_bounded_with_full_attrition_at_100() {
        let curve = model().calibrate(75.0, 2.0).unwrap();
        for age in 0..MAX_AGE {
            let q = curve.probability(age);
            assert!((0.0..1.0).contains(&q), "age {age} has q {q}");
        }
        assert_eq!(curve.probability(MAX_AGE), 1.0);
    }

    #[test]
    fn multiplier_raises_mortality() {
        let base = model().calibrate(80.0, 1.0).unwrap();
        let harsh = model().calibrate(80.0, 1.5).unwrap();
        assert!(harsh.life_expectancy() < base.life_expectancy());
        assert_eq!(harsh.calibration(), base.calibration());
        assert!((harsh.probability(60) - 1.5 * base.probability(60)).abs() < 1e-12);
    }

    #[test]
    fn unreachable_target_is_approximate_not_fatal() {
        let curve = model().calibrate(150.0, 1.0).unwrap();
        let calibration = curve.calibration();
        assert!(calibration.is_approximate());
        assert_eq!(calibration.iterations, 60);
        assert!(calibration.implied_life_expectancy > 95.0);
    }

    #[test]
    fn rejects_non_positive_life_expectancy() {
        assert!(model().calibrate(0.0, 1.0).unwrap_err().is_invalid_parameter());
        assert!(model().calibrate(f64::NAN, 1.0).is_err());
        assert!(model().calibrate(70.0, -1.0).is_err());
    }

    #[test]
    fn rejects_config_without_search_budget() {
        let config = MortalityConfig {
            max_iterations: 0,
            ..MortalityConfig::default()
        };
        assert!(MortalityModel::new(config).unwrap_err().is_invalid_parameter());

        let inverted = MortalityConfig {
            beta_min: 1.0,
            beta_max: 1e-3,
            ..MortalityConfig::default()
        };
        assert!(MortalityModel::new(inverted).is_err());
    }

    #[test]
    fn open_ended_terminal_keeps_hazard_probability() {
        let config = MortalityConfig {
            terminal: TerminalPolicy::OpenEnded,
            ..MortalityConfig::default()
        };
        let curve = MortalityModel::new(config).unwrap().calibrate(80.0, 1.0).unwrap();
        let q = curve.probability(MAX_AGE);
        assert!(q > 0.0 && q < 1.0);
    }

    #[test]
    fn survivorship_is_non_increasing() {
        let curve = model().calibrate(65.0, 1.0).unwrap();
        let l = curve.survivorship();
        assert_eq!(l[0], 1.0);
        assert!(l.windows(2).all(|pair| pair[1] <= pair[0]));
        assert_eq!(l[AGE_BUCKETS], 0.0);
    }

    #[test]
    fn cache_reuses_curves() {
        let mut cache = MortalityCache::new(model());
        let first = cache.get_or_calibrate(78.0, 1.0).unwrap();
        let second = cache.get_or_calibrate(78.0, 1.0).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        cache.get_or_calibrate(78.0, 1.2).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
