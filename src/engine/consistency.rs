//! Post-step accounting checks.

use serde::Serialize;

use crate::cohort::CohortState;
use crate::config::ConsistencyConfig;
use crate::error::{DemographyError, DemographyResult};

/// Flows recorded while applying one annual transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YearFlows {
    pub births: f64,
    pub deaths: f64,
    pub migration_requested: f64,
    pub migration_applied: f64,
}

/// Non-fatal findings attached to a year's summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    /// `new_total` differs from `old_total - deaths + births + migration`
    /// by more than the configured tolerance.
    AccountingDrift {
        expected_total: f64,
        actual_total: f64,
        residual: f64,
        tolerance: f64,
    },
    /// Outflow reduced so that no cohort went negative.
    MigrationShortfall { requested: f64, applied: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub expected_total: f64,
    pub actual_total: f64,
    pub residual: f64,
    pub tolerance: f64,
    pub warnings: Vec<ConsistencyWarning>,
}

impl ConsistencyReport {
    /// Report for a state with no preceding transition.
    pub fn baseline(total: f64) -> Self {
        Self {
            expected_total: total,
            actual_total: total,
            residual: 0.0,
            tolerance: 0.0,
            warnings: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    config: ConsistencyConfig,
}

impl ConsistencyChecker {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    /// Fails on the first negative or non-finite cell of `state`.
    pub fn ensure_valid_cells(&self, year: i32, state: &CohortState) -> DemographyResult<()> {
        match state.first_invalid() {
            Some((sex, age, value)) => Err(DemographyError::InvariantViolation {
                year,
                age,
                sex,
                value,
            }),
            None => Ok(()),
        }
    }

    /// Checks one transition from `before` to `after`.
    ///
    /// A negative or non-finite cohort is an error; accounting drift and migration
    /// shortfall come back as warnings in the report.
    pub fn check(
        &self,
        year: i32,
        before: &CohortState,
        after: &CohortState,
        flows: &YearFlows,
    ) -> DemographyResult<ConsistencyReport> {
        self.ensure_valid_cells(year, after)?;

        let old_total = before.total();
        let actual_total = after.total();
        let expected_total = old_total - flows.deaths + flows.births + flows.migration_applied;
        let residual = actual_total - expected_total;
        let scale = old_total.abs().max(actual_total.abs());
        let tolerance = self.config.absolute_tolerance + self.config.relative_tolerance * scale;

        let mut warnings = Vec::new();
        if !(residual.abs() <= tolerance) {
            warnings.push(ConsistencyWarning::AccountingDrift {
                expected_total,
                actual_total,
                residual,
                tolerance,
            });
        }
        let shortfall = flows.migration_requested - flows.migration_applied;
        if shortfall.abs() > tolerance {
            warnings.push(ConsistencyWarning::MigrationShortfall {
                requested: flows.migration_requested,
                applied: flows.migration_applied,
            });
        }

        Ok(ConsistencyReport {
            expected_total,
            actual_total,
            residual,
            tolerance,
            warnings,
        })
    }
}
