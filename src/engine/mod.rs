pub mod consistency;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    cohort::{AgeStructure, CohortState, Sex, MAX_AGE},
    config::{ModelConfig, TerminalPolicy, TransitionOrder},
    error::{ensure_finite, DemographyError, DemographyResult},
    models::{
        BirthSplit, Calibration, FertilityCurve, FertilityModel, MigrationAllocator,
        MigrationPolicy, MortalityCache, MortalityCurve, MortalityModel,
    },
};

pub use consistency::{ConsistencyChecker, ConsistencyReport, ConsistencyWarning, YearFlows};

/// Scalar inputs of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub tfr: f64,
    pub life_expectancy_male: f64,
    pub life_expectancy_female: f64,
    pub net_migration: f64,
    #[serde(default = "crate::config::default_sex_ratio_at_birth")]
    pub sex_ratio_at_birth: f64,
    #[serde(default = "crate::config::default_mortality_multiplier")]
    pub mortality_multiplier: f64,
    #[serde(default)]
    pub migration: MigrationPolicy,
    pub start_year: i32,
    pub num_years: u32,
}

/// Everything one annual transition needs, derived once per run.
#[derive(Debug, Clone)]
pub struct DemographicModels {
    pub mortality_male: MortalityCurve,
    pub mortality_female: MortalityCurve,
    pub fertility: FertilityCurve,
    pub birth_split: BirthSplit,
    pub migration: MigrationAllocator,
    pub net_migration: f64,
}

impl DemographicModels {
    pub fn mortality(&self, sex: Sex) -> &MortalityCurve {
        match sex {
            Sex::Male => &self.mortality_male,
            Sex::Female => &self.mortality_female,
        }
    }
}

/// Output record of one simulated year (or of the baseline, index 0).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub index: u32,
    pub year: i32,
    pub total_population: f64,
    pub male_population: f64,
    pub female_population: f64,
    pub births: f64,
    pub male_births: f64,
    pub female_births: f64,
    pub deaths: f64,
    pub male_deaths: f64,
    pub female_deaths: f64,
    pub migration_requested: f64,
    pub migration_applied: f64,
    pub migration_shortfall: f64,
    pub age_structure: AgeStructure,
    pub consistency: ConsistencyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<CohortState>,
}

impl YearSummary {
    fn baseline(year: i32, state: &CohortState, snapshot: bool) -> Self {
        Self {
            index: 0,
            year,
            total_population: state.total(),
            male_population: state.total_for(Sex::Male),
            female_population: state.total_for(Sex::Female),
            births: 0.0,
            male_births: 0.0,
            female_births: 0.0,
            deaths: 0.0,
            male_deaths: 0.0,
            female_deaths: 0.0,
            migration_requested: 0.0,
            migration_applied: 0.0,
            migration_shortfall: 0.0,
            age_structure: state.age_structure(),
            consistency: ConsistencyReport::baseline(state.total()),
            snapshot: snapshot.then(|| state.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub baseline: YearSummary,
    pub years: Vec<YearSummary>,
    pub final_state: CohortState,
    pub calibration_male: Calibration,
    pub calibration_female: Calibration,
}

impl SimulationResult {
    /// Baseline followed by every simulated year.
    pub fn records(&self) -> impl Iterator<Item = &YearSummary> {
        std::iter::once(&self.baseline).chain(self.years.iter())
    }

    pub fn year_list(&self) -> Vec<i32> {
        self.records().map(|r| r.year).collect()
    }

    pub fn population_series(&self) -> Vec<f64> {
        self.records().map(|r| r.total_population).collect()
    }

    pub fn births_series(&self) -> Vec<f64> {
        self.records().map(|r| r.births).collect()
    }

    pub fn deaths_series(&self) -> Vec<f64> {
        self.records().map(|r| r.deaths).collect()
    }

    pub fn migration_series(&self) -> Vec<f64> {
        self.records().map(|r| r.migration_applied).collect()
    }

    pub fn has_warnings(&self) -> bool {
        self.years.iter().any(|y| !y.consistency.is_clean())
    }

    pub fn calibration_is_approximate(&self) -> bool {
        self.calibration_male.is_approximate() || self.calibration_female.is_approximate()
    }
}

pub struct EngineBuilder {
    config: ModelConfig,
}

impl EngineBuilder {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn with_order(mut self, order: TransitionOrder) -> Self {
        self.config.transition.order = order;
        self
    }

    pub fn with_terminal_policy(mut self, terminal: TerminalPolicy) -> Self {
        self.config.mortality.terminal = terminal;
        self
    }

    pub fn with_snapshot_interval(mut self, years: u32) -> Self {
        self.config.run.snapshot_interval_years = years;
        self
    }

    pub fn build(self) -> DemographyResult<Engine> {
        Engine::new(self.config)
    }
}

/// Drives annual transitions of a cohort state.
pub struct Engine {
    config: ModelConfig,
    mortality: MortalityCache,
    fertility: FertilityModel,
    checker: ConsistencyChecker,
}

impl Engine {
    pub fn new(config: ModelConfig) -> DemographyResult<Self> {
        config.validate()?;
        Ok(Self {
            mortality: MortalityCache::new(MortalityModel::new(config.mortality.clone())?),
            fertility: FertilityModel::new(config.fertility.clone())?,
            checker: ConsistencyChecker::new(config.consistency.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn checker(&self) -> &ConsistencyChecker {
        &self.checker
    }

    /// Mortality curve for one sex, memoised by its inputs.
    pub fn calibrate(
        &mut self,
        life_expectancy: f64,
        multiplier: f64,
    ) -> DemographyResult<MortalityCurve> {
        self.mortality.get_or_calibrate(life_expectancy, multiplier)
    }

    /// Calibrates both sexes and derives fertility and migration for `params`.
    pub fn prepare(&mut self, params: &RunParams) -> DemographyResult<DemographicModels> {
        let net_migration = ensure_finite("net_migration", params.net_migration)?;
        let mortality_male =
            self.calibrate(params.life_expectancy_male, params.mortality_multiplier)?;
        let mortality_female =
            self.calibrate(params.life_expectancy_female, params.mortality_multiplier)?;
        let (fertility, birth_split) = self
            .fertility
            .derive(params.tfr, params.sex_ratio_at_birth)?;
        let migration = MigrationAllocator::new(params.migration)?;

        for (sex, curve) in [(Sex::Male, &mortality_male), (Sex::Female, &mortality_female)] {
            let calibration = curve.calibration();
            if calibration.is_approximate() {
                warn!(
                    %sex,
                    target = calibration.target_life_expectancy,
                    implied = calibration.implied_life_expectancy,
                    "mortality calibration did not converge; using closest curve"
                );
            }
        }

        Ok(DemographicModels {
            mortality_male,
            mortality_female,
            fertility,
            birth_split,
            migration,
            net_migration,
        })
    }

    /// Applies one year to a copy of `state`.
    ///
    /// `year` is the calendar year being produced; it only labels the
    /// summary and any invariant violation.
    pub fn step(
        &self,
        state: &CohortState,
        models: &DemographicModels,
        year: i32,
        index: u32,
    ) -> DemographyResult<(CohortState, YearSummary)> {
        let mut next = state.clone();

        let (deaths, births) = match self.config.transition.order {
            TransitionOrder::DieThenAge => {
                let deaths = apply_deaths(&mut next, models);
                let births = models.fertility.births(&next);
                age_one_year(&mut next);
                (deaths, births)
            }
            TransitionOrder::AgeThenDie => {
                age_one_year(&mut next);
                let deaths = apply_deaths(&mut next, models);
                let births = models.fertility.births_with_offset(&next, 1);
                (deaths, births)
            }
        };

        // age 0 is empty after the shift
        let (male_births, female_births) = models.birth_split.split(births);
        next.cohorts_mut(Sex::Male)[0] = male_births;
        next.cohorts_mut(Sex::Female)[0] = female_births;

        let migration = models.migration.allocate(models.net_migration, &next)?;
        migration.apply_to(&mut next);

        let flows = YearFlows {
            births,
            deaths: deaths.0 + deaths.1,
            migration_requested: migration.requested(),
            migration_applied: migration.applied(),
        };
        let report = self.checker.check(year, state, &next, &flows)?;

        let interval = self.config.run.snapshot_interval_years;
        let snapshot = interval > 0 && index % interval == 0;
        let summary = YearSummary {
            index,
            year,
            total_population: next.total(),
            male_population: next.total_for(Sex::Male),
            female_population: next.total_for(Sex::Female),
            births,
            male_births,
            female_births,
            deaths: flows.deaths,
            male_deaths: deaths.0,
            female_deaths: deaths.1,
            migration_requested: flows.migration_requested,
            migration_applied: flows.migration_applied,
            migration_shortfall: migration.shortfall(),
            age_structure: next.age_structure(),
            consistency: report,
            snapshot: snapshot.then(|| next.clone()),
        };
        Ok((next, summary))
    }

    pub fn run(
        &mut self,
        initial: &CohortState,
        params: &RunParams,
    ) -> DemographyResult<SimulationResult> {
        self.run_with_hook(initial, params, |_| {})
    }

    /// Runs `params.num_years` sequential years, calling `hook` with each
    /// year's summary as soon as it is produced.
    pub fn run_with_hook<F>(
        &mut self,
        initial: &CohortState,
        params: &RunParams,
        mut hook: F,
    ) -> DemographyResult<SimulationResult>
    where
        F: FnMut(&YearSummary),
    {
        if params.num_years > self.config.run.max_years {
            return Err(DemographyError::invalid(
                "num_years",
                format!(
                    "{} exceeds the configured maximum of {}",
                    params.num_years, self.config.run.max_years
                ),
            ));
        }
        self.checker.ensure_valid_cells(params.start_year, initial)?;
        let models = self.prepare(params)?;

        info!(
            start_year = params.start_year,
            years = params.num_years,
            population = initial.total(),
            tfr = params.tfr,
            net_migration = params.net_migration,
            "starting cohort simulation"
        );

        let baseline = YearSummary::baseline(
            params.start_year,
            initial,
            self.config.run.snapshot_interval_years > 0,
        );
        let mut state = initial.clone();
        let mut years = Vec::with_capacity(params.num_years as usize);
        for index in 1..=params.num_years {
            let year = params.start_year + index as i32;
            let (next, summary) = self.step(&state, &models, year, index)?;
            debug!(
                year,
                population = summary.total_population,
                births = summary.births,
                deaths = summary.deaths,
                migration = summary.migration_applied,
                "year simulated"
            );
            for warning in &summary.consistency.warnings {
                warn!(year, ?warning, "consistency warning");
            }
            hook(&summary);
            years.push(summary);
            state = next;
        }

        info!(
            final_year = params.start_year + params.num_years as i32,
            population = state.total(),
            "cohort simulation finished"
        );

        Ok(SimulationResult {
            baseline,
            years,
            final_state: state,
            calibration_male: *models.mortality_male.calibration(),
            calibration_female: *models.mortality_female.calibration(),
        })
    }
}

/// Removes `cell * q(age)` from every cell; returns (male, female) deaths.
fn apply_deaths(state: &mut CohortState, models: &DemographicModels) -> (f64, f64) {
    let mut totals = [0.0; 2];
    for (slot, sex) in totals.iter_mut().zip(Sex::ALL) {
        let q = models.mortality(sex).probabilities();
        for (cell, probability) in state.cohorts_mut(sex).iter_mut().zip(q.iter()) {
            let deaths = *cell * probability;
            *cell -= deaths;
            *slot += deaths;
        }
    }
    (totals[0], totals[1])
}

/// Shifts every cohort up one year; the terminal bucket keeps its
/// survivors and receives the 99-year-olds. Age 0 is left empty.
fn age_one_year(state: &mut CohortState) {
    for sex in Sex::ALL {
        let cells = state.cohorts_mut(sex);
        cells[MAX_AGE] += cells[MAX_AGE - 1];
        cells.copy_within(0..MAX_AGE - 1, 1);
        cells[0] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::AGE_BUCKETS;

    fn params(tfr: f64, net_migration: f64, num_years: u32) -> RunParams {
        RunParams {
            tfr,
            life_expectancy_male: 78.0,
            life_expectancy_female: 83.0,
            net_migration,
            sex_ratio_at_birth: 105.0,
            mortality_multiplier: 1.0,
            migration: MigrationPolicy::default(),
            start_year: 2025,
            num_years,
        }
    }

    fn flat_state(per_cell: f64) -> CohortState {
        CohortState::from_counts(&[per_cell; AGE_BUCKETS], &[per_cell; AGE_BUCKETS]).unwrap()
    }

    #[test]
    fn aging_moves_cohorts_and_fills_terminal_bucket() {
        let mut state = CohortState::empty()
            .with_cohort(Sex::Male, 0, 5.0)
            .unwrap()
            .with_cohort(Sex::Male, 99, 3.0)
            .unwrap()
            .with_cohort(Sex::Male, MAX_AGE, 2.0)
            .unwrap();
        age_one_year(&mut state);
        assert_eq!(state.get(Sex::Male, 0), 0.0);
        assert_eq!(state.get(Sex::Male, 1), 5.0);
        assert_eq!(state.get(Sex::Male, 99), 0.0);
        assert_eq!(state.get(Sex::Male, MAX_AGE), 5.0);
    }

    #[test]
    fn step_conserves_population() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let p = params(1.6, 20_000.0, 1);
        let models = engine.prepare(&p).unwrap();
        let state = flat_state(1_000.0);
        let (next, summary) = engine.step(&state, &models, 2026, 1).unwrap();

        let expected = state.total() - summary.deaths + summary.births + summary.migration_applied;
        assert!((next.total() - expected).abs() < 1e-6);
        assert!(summary.consistency.is_clean());
        assert!(summary.consistency.residual.abs() <= summary.consistency.tolerance);
        assert!((summary.consistency.actual_total - next.total()).abs() < 1e-9);
        assert!((summary.male_births + summary.female_births - summary.births).abs() < 1e-9);
        assert_eq!(next.get(Sex::Male, 0), summary.male_births);
    }

    #[test]
    fn full_attrition_clears_the_terminal_bucket_each_year() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let models = engine.prepare(&params(0.0, 0.0, 1)).unwrap();
        let state = CohortState::empty()
            .with_cohort(Sex::Female, MAX_AGE, 100.0)
            .unwrap();
        let (next, summary) = engine.step(&state, &models, 2026, 1).unwrap();
        assert_eq!(next.total(), 0.0);
        assert_eq!(summary.deaths, 100.0);
    }

    #[test]
    fn open_ended_terminal_keeps_centenarians() {
        let mut engine = EngineBuilder::new(ModelConfig::default())
            .with_terminal_policy(TerminalPolicy::OpenEnded)
            .build()
            .unwrap();
        let models = engine.prepare(&params(0.0, 0.0, 1)).unwrap();
        let state = CohortState::empty()
            .with_cohort(Sex::Female, MAX_AGE, 100.0)
            .unwrap();
        let (next, summary) = engine.step(&state, &models, 2026, 1).unwrap();
        assert!(next.get(Sex::Female, MAX_AGE) > 0.0);
        assert!((next.total() + summary.deaths - 100.0).abs() < 1e-9);
    }

    #[test]
    fn age_then_die_applies_mortality_at_the_new_age() {
        let mut engine = EngineBuilder::new(ModelConfig::default())
            .with_order(TransitionOrder::AgeThenDie)
            .build()
            .unwrap();
        let models = engine.prepare(&params(0.0, 0.0, 1)).unwrap();
        let state = CohortState::empty()
            .with_cohort(Sex::Male, 99, 100.0)
            .unwrap();
        let (next, summary) = engine.step(&state, &models, 2026, 1).unwrap();
        // moved into the terminal bucket and removed there in the same year
        assert_eq!(next.total(), 0.0);
        assert_eq!(summary.deaths, 100.0);
    }

    #[test]
    fn both_orders_charge_the_same_fertility_schedule() {
        let state = CohortState::empty()
            .with_cohort(Sex::Female, 25, 1_000.0)
            .unwrap();
        let p = params(2.0, 0.0, 1);

        let mut die_first = Engine::new(ModelConfig::default()).unwrap();
        let models = die_first.prepare(&p).unwrap();
        let (_, a) = die_first.step(&state, &models, 2026, 1).unwrap();

        let mut age_first = EngineBuilder::new(ModelConfig::default())
            .with_order(TransitionOrder::AgeThenDie)
            .build()
            .unwrap();
        let models = age_first.prepare(&p).unwrap();
        let (_, b) = age_first.step(&state, &models, 2026, 1).unwrap();

        let asfr = models.fertility.rate(25);
        let q25 = models.mortality_female.probability(25);
        let q26 = models.mortality_female.probability(26);
        assert!((a.births - 1_000.0 * (1.0 - q25) * asfr).abs() < 1e-9);
        assert!((b.births - 1_000.0 * (1.0 - q26) * asfr).abs() < 1e-9);
    }

    #[test]
    fn run_reports_baseline_and_each_year() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let result = engine.run(&flat_state(500.0), &params(1.8, 1_000.0, 10)).unwrap();

        assert_eq!(result.years.len(), 10);
        assert_eq!(result.baseline.year, 2025);
        assert_eq!(result.baseline.births, 0.0);
        assert_eq!(result.year_list().first(), Some(&2025));
        assert_eq!(result.year_list().last(), Some(&2035));
        assert_eq!(result.population_series().len(), 11);
        assert_eq!(
            result.years.last().map(|y| y.total_population),
            Some(result.final_state.total())
        );
        assert!(!result.has_warnings());
    }

    #[test]
    fn snapshots_follow_the_interval() {
        let mut engine = EngineBuilder::new(ModelConfig::default())
            .with_snapshot_interval(5)
            .build()
            .unwrap();
        let result = engine.run(&flat_state(10.0), &params(1.8, 0.0, 10)).unwrap();
        assert!(result.baseline.snapshot.is_some());
        let with_snapshot: Vec<u32> = result
            .years
            .iter()
            .filter(|y| y.snapshot.is_some())
            .map(|y| y.index)
            .collect();
        assert_eq!(with_snapshot, vec![5, 10]);
        assert_eq!(result.years[9].snapshot.as_ref(), Some(&result.final_state));
    }

    #[test]
    fn run_rejects_excessive_horizon() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let err = engine
            .run(&flat_state(1.0), &params(1.8, 0.0, 5_000))
            .unwrap_err();
        assert!(err.is_invalid_parameter());
    }

    #[test]
    fn run_params_fill_rate_defaults() {
        let json = r#"{
            "tfr": 1.7,
            "life_expectancy_male": 77.0,
            "life_expectancy_female": 82.0,
            "net_migration": 0.0,
            "start_year": 2030,
            "num_years": 5
        }"#;
        let params: RunParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.sex_ratio_at_birth, 105.0);
        assert_eq!(params.mortality_multiplier, 1.0);
        assert_eq!(params.migration, MigrationPolicy::default());
    }

    #[test]
    fn overflowing_births_stop_the_run() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let initial = CohortState::empty()
            .with_cohort(Sex::Female, 25, 1e300)
            .unwrap();
        let err = engine
            .run(&initial, &params(1e10, 0.0, 3))
            .unwrap_err();
        assert!(
            matches!(err, DemographyError::InvariantViolation { year: 2026, age: 0, .. }),
            "{err}"
        );
    }

    #[test]
    fn run_rejects_bad_parameters_before_stepping() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let mut calls = 0;
        let mut p = params(-1.0, 0.0, 3);
        let err = engine
            .run_with_hook(&flat_state(1.0), &p, |_| calls += 1)
            .unwrap_err();
        assert!(err.is_invalid_parameter());
        assert_eq!(calls, 0);

        p.tfr = 1.5;
        p.life_expectancy_female = -3.0;
        assert!(engine.run(&flat_state(1.0), &p).is_err());
    }

    #[test]
    fn hook_sees_every_year_in_order() {
        let mut engine = Engine::new(ModelConfig::default()).unwrap();
        let mut seen = Vec::new();
        engine
            .run_with_hook(&flat_state(10.0), &params(1.8, 0.0, 6), |summary| {
                seen.push(summary.year)
            })
            .unwrap();
        assert_eq!(seen, vec![2026, 2027, 2028, 2029, 2030, 2031]);
    }
}
