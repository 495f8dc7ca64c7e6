use crate::persistence::checkpoint::{CheckpointStore, EnergyCheckpoint};
use crate::prelude::{
    ProcessingStage, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::time::{epoch_seconds, SystemClock, TimeSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Input samples per emitted cumulative value.
    pub decimation: usize,
    /// Sample rate of the power stream; the step is `1 / sample_rate`.
    pub sample_rate: f32,
    pub save_interval_secs: u64,
    pub reset_period_secs: u64,
    pub checkpoint_path: PathBuf,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            decimation: 1_000,
            sample_rate: 1_000.0,
            save_interval_secs: 10 * 60,
            reset_period_secs: 30 * SECONDS_PER_DAY,
            checkpoint_path: PathBuf::from("energy_checkpoint.txt"),
        }
    }
}

impl IntegrationConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.decimation == 0 {
            return Err(StageError::InvalidConfig(
                "integration decimation must be positive".into(),
            ));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "integration sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.save_interval_secs == 0 || self.reset_period_secs == 0 {
            return Err(StageError::InvalidConfig(
                "save interval and reset period must be non-zero".into(),
            ));
        }
        if i64::try_from(self.save_interval_secs).is_err()
            || i64::try_from(self.reset_period_secs).is_err()
        {
            return Err(StageError::InvalidConfig(format!(
                "save interval and reset period must not exceed {} seconds",
                i64::MAX
            )));
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(StageError::InvalidConfig("checkpoint path is empty".into()));
        }
        Ok(())
    }
}

/// Trapezoidal integrator turning a power stream into a running energy total.
///
/// The total survives restarts through a checkpoint file written every
/// `save_interval_secs` and is zeroed every `reset_period_secs`. The last
/// sample of each block is carried as the left edge of the next block's
/// first trapezoid, except right after start-up.
pub struct EnergyIntegrator {
    config: IntegrationConfig,
    step: f64,
    store: CheckpointStore,
    clock: Box<dyn TimeSource>,
    started: bool,
    checkpoint: EnergyCheckpoint,
    last_sample: Option<f64>,
    group_integral: f64,
    group_len: usize,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl EnergyIntegrator {
    pub fn new(config: IntegrationConfig) -> StageResult<Self> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: IntegrationConfig, clock: Box<dyn TimeSource>) -> StageResult<Self> {
        config.validate()?;
        Ok(Self {
            step: 1.0 / config.sample_rate as f64,
            store: CheckpointStore::new(config.checkpoint_path.clone()),
            clock,
            started: false,
            checkpoint: EnergyCheckpoint::fresh(0),
            last_sample: None,
            group_integral: 0.0,
            group_len: 0,
            logger: LogManager::new("integration"),
            metrics: MetricsRecorder::new(),
            config,
        })
    }

    /// Integrates one block and returns the running total after every complete group.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let now = epoch_seconds(self.clock.now());
        if !self.started {
            self.recover(now);
        }
        self.apply_reset_schedule(now);

        let mut out = Vec::with_capacity(samples.len() / self.config.decimation + 1);
        let mut skipped = 0usize;
        for &sample in samples {
            let sample = sample as f64;
            if sample.is_finite() {
                if let Some(previous) = self.last_sample {
                    self.group_integral += self.step * (previous + sample) / 2.0;
                }
                self.last_sample = Some(sample);
            } else {
                skipped += 1;
            }

            self.group_len += 1;
            if self.group_len == self.config.decimation {
                self.checkpoint.cumulative_sum += self.group_integral;
                self.group_integral = 0.0;
                self.group_len = 0;
                out.push(self.checkpoint.cumulative_sum as f32);
            }
        }

        if skipped > 0 {
            self.logger
                .fault(&format!("skipped {} non-finite power samples", skipped));
            self.metrics.record_fault();
        }
        self.apply_save_schedule(now);
        self.metrics.record_block(samples.len());
        out
    }

    fn recover(&mut self, now: i64) {
        self.started = true;
        self.last_sample = None;
        match self.store.load() {
            Ok(checkpoint) => {
                self.logger.record(&format!(
                    "resumed from {} with {} accumulated",
                    self.store.path().display(),
                    checkpoint.cumulative_sum
                ));
                self.checkpoint = checkpoint;
            }
            Err(err) => {
                self.logger.warn(&format!(
                    "no usable checkpoint at {} ({}); starting from zero",
                    self.store.path().display(),
                    err
                ));
                self.checkpoint = EnergyCheckpoint::fresh(now);
                self.persist();
            }
        }
    }

    fn apply_reset_schedule(&mut self, now: i64) {
        // Both periods fit in i64 once validated; timestamps from disk may not.
        let elapsed = now.saturating_sub(self.checkpoint.last_reset);
        if elapsed < self.config.reset_period_secs as i64 {
            return;
        }
        self.logger.record(&format!(
            "reset period elapsed; discarding {} accumulated",
            self.checkpoint.cumulative_sum + self.group_integral
        ));
        self.checkpoint = EnergyCheckpoint::fresh(now);
        // The open group keeps its cadence but not the old period's energy.
        self.group_integral = 0.0;
        self.persist();
    }

    fn apply_save_schedule(&mut self, now: i64) {
        let elapsed = now.saturating_sub(self.checkpoint.last_save);
        if elapsed < self.config.save_interval_secs as i64 {
            return;
        }
        self.checkpoint.last_save = now;
        self.persist();
    }

    /// Best effort; a failed write is retried at the next scheduled save.
    fn persist(&mut self) {
        if let Err(err) = self.store.save(&self.checkpoint) {
            self.logger.warn(&format!(
                "checkpoint write to {} failed: {}",
                self.store.path().display(),
                err
            ));
            self.metrics.record_persistence_failure();
        }
    }

    pub fn cumulative_sum(&self) -> f64 {
        self.checkpoint.cumulative_sum
    }

    pub fn checkpoint(&self) -> EnergyCheckpoint {
        self.checkpoint
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for EnergyIntegrator {
    fn name(&self) -> &'static str {
        "integration"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(1)?;
        let block = &input.blocks[0];
        let energy = self.process(&block.samples);

        let output_rate = self.config.sample_rate / self.config.decimation as f32;
        let mut metadata = StageMetadata::describe(output_rate, &["E"], &["Ws"]);
        metadata.timestamp_ns = block.timestamp_ns;
        Ok(StageOutput {
            channels: vec![energy],
            metadata,
        })
    }

    /// Flushes the current total so a restart resumes from it.
    fn cleanup(&mut self) {
        if self.started {
            let now = epoch_seconds(self.clock.now());
            self.checkpoint.last_save = now.max(self.checkpoint.last_reset);
            self.persist();
        }
    }
}
