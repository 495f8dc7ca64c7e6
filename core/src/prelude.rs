use serde::{Deserialize, Serialize};

/// A block of real-valued samples delivered by the acquisition side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub sample_rate: f32,
    pub timestamp_ns: Option<i64>,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp_ns: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = Some(timestamp_ns);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Input payload for a processing stage, one block per input port.
#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub blocks: Vec<SampleBlock>,
}

impl StageInput {
    pub fn single(block: SampleBlock) -> Self {
        Self {
            blocks: vec![block],
        }
    }

    /// Builds an input from parallel channels sharing one rate and timestamp.
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: f32, timestamp_ns: Option<i64>) -> Self {
        let blocks = channels
            .into_iter()
            .map(|samples| SampleBlock {
                samples,
                sample_rate,
                timestamp_ns,
            })
            .collect();
        Self { blocks }
    }

    /// Checks the port count and that every port carries the same number of samples.
    pub fn expect_ports(&self, ports: usize) -> StageResult<usize> {
        if self.blocks.len() != ports {
            return Err(StageError::InvalidInput(format!(
                "expected {} input ports, got {}",
                ports,
                self.blocks.len()
            )));
        }
        let len = self.blocks.first().map(SampleBlock::len).unwrap_or(0);
        if self.blocks.iter().any(|block| block.len() != len) {
            return Err(StageError::InvalidInput(
                "input ports carry different sample counts".into(),
            ));
        }
        Ok(len)
    }

    pub fn timestamp_ns(&self) -> Option<i64> {
        self.blocks.first().and_then(|block| block.timestamp_ns)
    }
}

/// Output produced by each stage: one vector per output port.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub channels: Vec<Vec<f32>>,
    pub metadata: StageMetadata,
}

impl StageOutput {
    pub fn channel(&self, name: &str) -> Option<&[f32]> {
        self.metadata
            .signal_names
            .iter()
            .position(|candidate| candidate == name)
            .and_then(|idx| self.channels.get(idx))
            .map(Vec::as_slice)
    }
}

/// Metadata used for chaining stages and publishing.
#[derive(Debug, Clone, Default)]
pub struct StageMetadata {
    pub sample_rate: f32,
    pub signal_names: Vec<String>,
    pub signal_units: Vec<String>,
    pub timestamp_ns: Option<i64>,
    pub notes: Vec<String>,
}

impl StageMetadata {
    pub fn describe(sample_rate: f32, names: &[&str], units: &[&str]) -> Self {
        Self {
            sample_rate,
            signal_names: names.iter().map(|name| name.to_string()).collect(),
            signal_units: units.iter().map(|unit| unit.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Common error type for stage construction and execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Block-at-a-time processing stage driven by an external scheduler.
pub trait ProcessingStage {
    fn name(&self) -> &'static str;
    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput>;
    fn cleanup(&mut self);
}

/// Rejects smoothing coefficients outside the open interval (0, 1).
pub fn validate_alpha(alpha: f64) -> StageResult<f64> {
    if alpha.is_finite() && alpha > 0.0 && alpha < 1.0 {
        Ok(alpha)
    } else {
        Err(StageError::InvalidConfig(format!(
            "alpha must lie in (0, 1), got {}",
            alpha
        )))
    }
}
