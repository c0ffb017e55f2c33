pub mod fertility;
pub mod migration;
pub mod mortality;

pub use fertility::{BirthSplit, FertilityCurve, FertilityModel};
pub use migration::{AgeBand, Distribution, MigrationAllocator, MigrationPolicy, MigrationVector, SexSplit};
pub use mortality::{Calibration, MortalityCache, MortalityCurve, MortalityModel};
