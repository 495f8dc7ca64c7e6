use crate::math::fft::FftHelper;
use crate::prelude::{
    ProcessingStage, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Transform length; each vector carries `fft_size / 2` amplitude bins.
    pub fft_size: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self { fft_size: 1024 }
    }
}

/// Turns a time-domain channel into consecutive single-sided amplitude spectra.
///
/// Input is buffered until a full transform length is available. The output
/// channel is the concatenation of the spectra, so its value rate is half the
/// input rate and each vector spans `fft_size` input samples.
pub struct SpectrumStage {
    fft: FftHelper,
    pending: Vec<f32>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl SpectrumStage {
    pub fn new(config: &SpectrumConfig) -> StageResult<Self> {
        if config.fft_size < 2 || config.fft_size % 2 != 0 {
            return Err(StageError::InvalidConfig(format!(
                "fft size must be even and at least 2, got {}",
                config.fft_size
            )));
        }
        Ok(Self {
            fft: FftHelper::new(config.fft_size),
            pending: Vec::with_capacity(config.fft_size),
            logger: LogManager::new("spectrum"),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft.size()
    }

    /// Bins per emitted vector.
    pub fn vector_size(&self) -> usize {
        self.fft.size() / 2
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let size = self.fft.size();
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / size;
        let fft = &mut self.fft;
        let spectra = self
            .pending
            .chunks_exact(size)
            .map(|frame| fft.amplitude_spectrum(frame))
            .collect();
        self.pending.drain(..complete * size);
        self.metrics.record_block(samples.len());
        spectra
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for SpectrumStage {
    fn name(&self) -> &'static str {
        "spectrum"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(1)?;
        let block = &input.blocks[0];
        let spectra = self.process(&block.samples);

        let mut metadata =
            StageMetadata::describe(block.sample_rate / 2.0, &["amplitude"], &[""]);
        metadata.timestamp_ns = block.timestamp_ns;
        metadata.notes.push(format!("vector_size={}", self.vector_size()));
        Ok(StageOutput {
            channels: vec![spectra.concat()],
            metadata,
        })
    }

    fn cleanup(&mut self) {
        if !self.pending.is_empty() {
            self.logger.record(&format!(
                "dropping {} samples short of a full transform",
                self.pending.len()
            ));
        }
        self.pending.clear();
    }
}
