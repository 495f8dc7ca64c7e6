pub mod checkpoint;

pub use checkpoint::{CheckpointError, CheckpointStore, EnergyCheckpoint};
