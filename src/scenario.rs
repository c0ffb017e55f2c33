use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    baseline,
    cohort::CohortState,
    config::ModelConfig,
    engine::{Engine, RunParams},
    error::{DemographyError, DemographyResult},
    models::{BirthSplit, MigrationPolicy},
};

fn default_years() -> u32 {
    50
}

/// Parameter record of one country.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub baseline_year: i32,
    pub population: f64,
    pub tfr: f64,
    pub life_expectancy_male: f64,
    pub life_expectancy_female: f64,
    pub net_migration: f64,
    #[serde(default = "crate::config::default_sex_ratio_at_birth")]
    pub sex_ratio_at_birth: f64,
    #[serde(default = "crate::config::default_mortality_multiplier")]
    pub mortality_multiplier: f64,
    #[serde(default = "default_years")]
    pub years: u32,
    #[serde(default)]
    pub concentrated_migration: bool,
    /// Age-by-sex counts for the baseline year; a stable population is
    /// synthesised when absent.
    #[serde(default)]
    pub baseline: Option<CohortState>,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Runner adjustments applied on top of a scenario's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub tfr: Option<f64>,
    pub life_expectancy_male: Option<f64>,
    pub life_expectancy_female: Option<f64>,
    pub net_migration: Option<f64>,
    pub mortality_multiplier: Option<f64>,
    pub start_year: Option<i32>,
    pub years: Option<u32>,
    pub concentrated_migration: Option<bool>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario
            .validate()
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    pub fn validate(&self) -> DemographyResult<()> {
        if !(self.population.is_finite() && self.population >= 0.0) {
            return Err(DemographyError::invalid(
                "population",
                format!("{} is not a non-negative count", self.population),
            ));
        }
        if !(self.tfr.is_finite() && self.tfr >= 0.0) {
            return Err(DemographyError::invalid("tfr", format!("{} is negative", self.tfr)));
        }
        for (field, value) in [
            ("life_expectancy_male", self.life_expectancy_male),
            ("life_expectancy_female", self.life_expectancy_female),
            ("sex_ratio_at_birth", self.sex_ratio_at_birth),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DemographyError::invalid(field, format!("{value} must be positive")));
            }
        }
        if !self.net_migration.is_finite() {
            return Err(DemographyError::invalid("net_migration", "must be finite"));
        }
        self.model.validate()
    }

    pub fn migration_policy(&self, concentrated: bool) -> MigrationPolicy {
        if concentrated {
            MigrationPolicy {
                band: MigrationPolicy::concentrated().band,
                ..self.model.migration
            }
        } else {
            self.model.migration
        }
    }

    pub fn run_params(&self, overrides: &Overrides) -> RunParams {
        let concentrated = overrides
            .concentrated_migration
            .unwrap_or(self.concentrated_migration);
        RunParams {
            tfr: overrides.tfr.unwrap_or(self.tfr),
            life_expectancy_male: overrides
                .life_expectancy_male
                .unwrap_or(self.life_expectancy_male),
            life_expectancy_female: overrides
                .life_expectancy_female
                .unwrap_or(self.life_expectancy_female),
            net_migration: overrides.net_migration.unwrap_or(self.net_migration),
            sex_ratio_at_birth: self.sex_ratio_at_birth,
            mortality_multiplier: overrides
                .mortality_multiplier
                .unwrap_or(self.mortality_multiplier),
            migration: self.migration_policy(concentrated),
            start_year: overrides.start_year.unwrap_or(self.baseline_year),
            num_years: overrides.years.unwrap_or(self.years),
        }
    }

    /// The supplied baseline, or a stable population built from the
    /// scenario's own fertility and (multiplier 1) mortality.
    pub fn initial_state(&self, engine: &mut Engine) -> DemographyResult<CohortState> {
        if let Some(state) = &self.baseline {
            return Ok(state.clone());
        }
        let male = engine.calibrate(self.life_expectancy_male, 1.0)?;
        let female = engine.calibrate(self.life_expectancy_female, 1.0)?;
        let split = BirthSplit::new(self.sex_ratio_at_birth)?;
        baseline::stable_population(self.population, self.tfr, &split, &male, &female)
    }

    pub fn engine(&self) -> DemographyResult<Engine> {
        Engine::new(self.model.clone())
    }
}
