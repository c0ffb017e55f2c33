pub mod baseline;
pub mod cohort;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod scenario;

pub use cohort::{CohortState, Sex, AGE_BUCKETS, MAX_AGE};
pub use config::ModelConfig;
pub use engine::{Engine, EngineBuilder, RunParams, SimulationResult, YearSummary};
pub use error::DemographyError;
