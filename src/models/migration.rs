use serde::{Deserialize, Serialize};

use crate::cohort::{AgeVector, CohortState, Sex, AGE_BUCKETS, MAX_AGE};
use crate::error::{ensure_finite, DemographyError, DemographyResult};

/// Inclusive age range receiving migrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeBand {
    pub min: usize,
    pub max: usize,
}

impl AgeBand {
    pub const STANDARD: AgeBand = AgeBand { min: 20, max: 39 };
    pub const CONCENTRATED: AgeBand = AgeBand { min: 25, max: 34 };

    pub fn new(min: usize, max: usize) -> DemographyResult<Self> {
        let band = Self { min, max };
        band.validate()?;
        Ok(band)
    }

    pub fn validate(&self) -> DemographyResult<()> {
        if self.min > self.max || self.max > MAX_AGE {
            return Err(DemographyError::invalid(
                "migration.band",
                format!("ages {}..={} are not an ascending band within 0..={MAX_AGE}", self.min, self.max),
            ));
        }
        Ok(())
    }

    pub fn ages(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }

    pub fn width(&self) -> usize {
        self.max - self.min + 1
    }
}

impl Default for AgeBand {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// How migrants spread over the ages of the band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Weighted by the current size of each (age, sex) cell.
    #[default]
    Proportional,
    Uniform,
}

/// How migrants are shared between the sexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SexSplit {
    /// Both sexes are weighted together, so each sex receives its share of
    /// the band population.
    #[default]
    Proportional,
    /// Half of the flow to each sex.
    Even,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPolicy {
    #[serde(default)]
    pub band: AgeBand,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default)]
    pub sex_split: SexSplit,
}

impl MigrationPolicy {
    /// Same rules as the default policy, restricted to ages 25-34.
    pub fn concentrated() -> Self {
        Self {
            band: AgeBand::CONCENTRATED,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DemographyResult<()> {
        self.band.validate()
    }
}

/// Per-cell migration for one year, already clamped so that adding it to
/// the state it was allocated against leaves every cell non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationVector {
    male: AgeVector,
    female: AgeVector,
    requested: f64,
    applied: f64,
}

impl MigrationVector {
    pub fn zero() -> Self {
        Self {
            male: [0.0; AGE_BUCKETS],
            female: [0.0; AGE_BUCKETS],
            requested: 0.0,
            applied: 0.0,
        }
    }

    pub fn cells(&self, sex: Sex) -> &AgeVector {
        match sex {
            Sex::Male => &self.male,
            Sex::Female => &self.female,
        }
    }

    pub fn requested(&self) -> f64 {
        self.requested
    }

    /// Elementwise sum of the vector.
    pub fn applied(&self) -> f64 {
        self.applied
    }

    /// Part of the requested flow that could not be applied.
    pub fn shortfall(&self) -> f64 {
        self.requested - self.applied
    }

    pub fn was_clamped(&self) -> bool {
        self.shortfall().abs() > 1e-9 * self.requested.abs().max(1.0)
    }

    /// Adds the vector to `state`, flooring cells at zero.
    pub fn apply_to(&self, state: &mut CohortState) {
        for sex in Sex::ALL {
            let delta = self.cells(sex);
            for (cell, change) in state.cohorts_mut(sex).iter_mut().zip(delta.iter()) {
                *cell = (*cell + change).max(0.0);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationAllocator {
    policy: MigrationPolicy,
}

impl MigrationAllocator {
    pub fn new(policy: MigrationPolicy) -> DemographyResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    pub fn allocate(
        &self,
        net_migration: f64,
        state: &CohortState,
    ) -> DemographyResult<MigrationVector> {
        let net = ensure_finite("net_migration", net_migration)?;
        if net == 0.0 {
            return Ok(MigrationVector::zero());
        }

        let male_weights = self.band_weights(state, Sex::Male);
        let female_weights = self.band_weights(state, Sex::Female);
        let male_sum: f64 = male_weights.iter().sum();
        let female_sum: f64 = female_weights.iter().sum();

        let (male_share, female_share) = match self.policy.sex_split {
            SexSplit::Proportional => {
                let total = male_sum + female_sum;
                if total > 0.0 {
                    (net * male_sum / total, net * female_sum / total)
                } else {
                    (0.5 * net, 0.5 * net)
                }
            }
            SexSplit::Even => (0.5 * net, 0.5 * net),
        };

        let mut vector = MigrationVector::zero();
        vector.requested = net;
        self.spread(&mut vector.male, male_share, &male_weights, male_sum);
        self.spread(&mut vector.female, female_share, &female_weights, female_sum);

        for sex in Sex::ALL {
            let cells = state.cohorts(sex);
            let flow = match sex {
                Sex::Male => &mut vector.male,
                Sex::Female => &mut vector.female,
            };
            for (change, current) in flow.iter_mut().zip(cells.iter()) {
                *change = change.max(-*current);
            }
        }
        vector.applied = vector.male.iter().sum::<f64>() + vector.female.iter().sum::<f64>();
        Ok(vector)
    }

    fn band_weights(&self, state: &CohortState, sex: Sex) -> AgeVector {
        let cells = state.cohorts(sex);
        let mut weights = [0.0; AGE_BUCKETS];
        for age in self.policy.band.ages() {
            weights[age] = match self.policy.distribution {
                Distribution::Proportional => cells[age],
                Distribution::Uniform => 1.0,
            };
        }
        weights
    }

    // An empty band falls back to an even spread over its ages.
    fn spread(&self, flow: &mut AgeVector, share: f64, weights: &AgeVector, weight_sum: f64) {
        let band = self.policy.band;
        if weight_sum > 0.0 {
            for age in band.ages() {
                flow[age] = share * weights[age] / weight_sum;
            }
        } else {
            let per_age = share / band.width() as f64;
            for age in band.ages() {
                flow[age] = per_age;
            }
        }
    }
}
