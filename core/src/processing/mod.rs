pub mod integration;
pub mod mains_frequency;
pub mod multi_phase;
pub mod power;
pub mod spectrum;
pub mod statistics;

pub use integration::{EnergyIntegrator, IntegrationConfig};
pub use mains_frequency::{MainsFrequencyConfig, MainsFrequencyDetector};
pub use multi_phase::MultiPhasePowerCalculator;
pub use power::{PhasorPowerCalculator, PowerCalculator, PowerConfig};
pub use spectrum::{SpectrumConfig, SpectrumStage};
pub use statistics::{StatisticsAggregator, StatisticsConfig};
