//! Streaming power-quality computation core.
//!
//! Block-oriented stages turn voltage and current measurements into power,
//! mains frequency, windowed statistics and accumulated energy, and hand
//! their results to registered publishing sinks.

pub mod math;
pub mod persistence;
pub mod prelude;
pub mod processing;
pub mod publish;
pub mod telemetry;
pub mod time;

pub use prelude::{ProcessingStage, SampleBlock, StageError, StageInput, StageOutput};
