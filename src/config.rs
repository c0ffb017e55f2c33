//! Model configuration shared by calibration, allocation and stepping.
//!
//! Every constant the models depend on lives here so that a run is fully
//! described by a `ModelConfig` plus the scenario parameters.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cohort::MAX_AGE;
use crate::error::{DemographyError, DemographyResult};
use crate::models::migration::MigrationPolicy;

fn default_alpha() -> f64 {
    0.0005
}

fn default_gamma() -> f64 {
    0.085
}

fn default_beta_min() -> f64 {
    1e-12
}

fn default_beta_max() -> f64 {
    10.0
}

fn default_tolerance_years() -> f64 {
    0.01
}

fn default_max_iterations() -> u32 {
    60
}

fn default_max_death_probability() -> f64 {
    1.0 - 1e-9
}

fn default_shape_a() -> f64 {
    2.0
}

fn default_shape_b() -> f64 {
    5.0
}

fn default_min_fertile_age() -> usize {
    15
}

fn default_max_fertile_age() -> usize {
    49
}

fn default_absolute_tolerance() -> f64 {
    1e-6
}

fn default_relative_tolerance() -> f64 {
    1e-9
}

fn default_max_years() -> u32 {
    1_000
}

pub(crate) fn default_sex_ratio_at_birth() -> f64 {
    105.0
}

pub(crate) fn default_mortality_multiplier() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub mortality: MortalityConfig,
    #[serde(default)]
    pub fertility: FertilityConfig,
    #[serde(default)]
    pub migration: MigrationPolicy,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub consistency: ConsistencyConfig,
    #[serde(default)]
    pub run: RunLimits,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gompertz-Makeham constants and the bounds of the beta search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MortalityConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_beta_min")]
    pub beta_min: f64,
    #[serde(default = "default_beta_max")]
    pub beta_max: f64,
    /// Accepted distance between implied and target life expectancy.
    #[serde(default = "default_tolerance_years")]
    pub tolerance_years: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Upper clamp applied to every age below the terminal bucket.
    #[serde(default = "default_max_death_probability")]
    pub max_death_probability: f64,
    #[serde(default)]
    pub terminal: TerminalPolicy,
}

impl Default for MortalityConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            gamma: default_gamma(),
            beta_min: default_beta_min(),
            beta_max: default_beta_max(),
            tolerance_years: default_tolerance_years(),
            max_iterations: default_max_iterations(),
            max_death_probability: default_max_death_probability(),
            terminal: TerminalPolicy::default(),
        }
    }
}

impl MortalityConfig {
    pub fn validate(&self) -> DemographyResult<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(DemographyError::invalid(
                "mortality.alpha",
                "must be finite and non-negative",
            ));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(DemographyError::invalid("mortality.gamma", "must be positive"));
        }
        if !(self.beta_min > 0.0 && self.beta_max.is_finite() && self.beta_min < self.beta_max) {
            return Err(DemographyError::invalid(
                "mortality.beta_min",
                format!(
                    "search bounds {}..{} are not increasing",
                    self.beta_min, self.beta_max
                ),
            ));
        }
        if !(self.tolerance_years > 0.0) {
            return Err(DemographyError::invalid(
                "mortality.tolerance_years",
                "must be positive",
            ));
        }
        if self.max_iterations == 0 {
            return Err(DemographyError::invalid(
                "mortality.max_iterations",
                "must be at least 1",
            ));
        }
        if !(self.max_death_probability > 0.0 && self.max_death_probability < 1.0) {
            return Err(DemographyError::invalid(
                "mortality.max_death_probability",
                "must lie in (0, 1)",
            ));
        }
        Ok(())
    }
}

/// What happens to people in the age-100 bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Death probability at 100 is forced to 1.
    #[default]
    FullAttrition,
    /// Age 100 keeps its hazard-derived probability and accumulates survivors.
    OpenEnded,
}

/// Shape of the childbearing schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertilityConfig {
    #[serde(default = "default_shape_a")]
    pub shape_a: f64,
    #[serde(default = "default_shape_b")]
    pub shape_b: f64,
    #[serde(default = "default_min_fertile_age")]
    pub min_age: usize,
    #[serde(default = "default_max_fertile_age")]
    pub max_age: usize,
}

impl Default for FertilityConfig {
    fn default() -> Self {
        Self {
            shape_a: default_shape_a(),
            shape_b: default_shape_b(),
            min_age: default_min_fertile_age(),
            max_age: default_max_fertile_age(),
        }
    }
}

impl FertilityConfig {
    pub fn validate(&self) -> DemographyResult<()> {
        // below 1 the density is unbounded at the edges of the band
        if !(self.shape_a >= 1.0 && self.shape_b >= 1.0) {
            return Err(DemographyError::invalid(
                "fertility.shape_a",
                "beta shape parameters must be at least 1",
            ));
        }
        if self.min_age >= self.max_age || self.max_age > MAX_AGE {
            return Err(DemographyError::invalid(
                "fertility.min_age",
                format!(
                    "childbearing ages {}..={} are not a valid band",
                    self.min_age, self.max_age
                ),
            ));
        }
        Ok(())
    }
}

/// Order in which deaths and the one-year age shift are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOrder {
    #[default]
    DieThenAge,
    AgeThenDie,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    #[serde(default)]
    pub order: TransitionOrder,
}

/// Tolerance for the population accounting identity:
/// `absolute + relative * max(old_total, new_total)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    #[serde(default = "default_absolute_tolerance")]
    pub absolute_tolerance: f64,
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            absolute_tolerance: default_absolute_tolerance(),
            relative_tolerance: default_relative_tolerance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    #[serde(default = "default_max_years")]
    pub max_years: u32,
    /// Attach a cohort snapshot every N years; 0 disables snapshots.
    #[serde(default)]
    pub snapshot_interval_years: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_years: default_max_years(),
            snapshot_interval_years: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ModelConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {}", path.display()))?;
        let config: ModelConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .with_context(|| format!("Failed to write model config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> DemographyResult<()> {
        self.mortality.validate()?;
        self.fertility.validate()?;
        self.migration.validate()?;

        let c = &self.consistency;
        if !(c.absolute_tolerance >= 0.0 && c.relative_tolerance >= 0.0) {
            return Err(DemographyError::invalid(
                "consistency.absolute_tolerance",
                "tolerances must be non-negative",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::migration::{AgeBand, Distribution};

    #[test]
    fn defaults_are_valid() {
        let config = ModelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.mortality.max_iterations, 60);
        assert_eq!(config.transition.order, TransitionOrder::DieThenAge);
        assert_eq!(config.mortality.terminal, TerminalPolicy::FullAttrition);
        assert_eq!(config.migration.band, AgeBand::STANDARD);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "mortality:\n  gamma: 0.09\ntransition:\n  order: age_then_die\n";
        let config: ModelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mortality.gamma, 0.09);
        assert_eq!(config.mortality.alpha, 0.0005);
        assert_eq!(config.transition.order, TransitionOrder::AgeThenDie);
        assert_eq!(config.migration.distribution, Distribution::Proportional);
    }

    #[test]
    fn rejects_inverted_fertility_band() {
        let mut config = ModelConfig::default();
        config.fertility.min_age = 50;
        config.fertility.max_age = 15;
        assert!(config.validate().unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yaml");
        let mut config = ModelConfig::default();
        config.run.snapshot_interval_years = 10;
        config.to_yaml(&path).unwrap();

        let loaded = ModelConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
