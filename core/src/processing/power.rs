use crate::math::ema::ExponentialFilter;
use crate::math::phase::wrap_phase;
use crate::prelude::{
    validate_alpha, ProcessingStage, StageError, StageInput, StageMetadata, StageOutput,
    StageResult,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Output port names of the single-phase power stages.
pub const POWER_SIGNALS: [&str; 6] = ["P", "Q", "S", "phi", "U_rms", "I_rms"];
pub const POWER_UNITS: [&str; 6] = ["W", "var", "VA", "rad", "V", "A"];

/// Smoothing configuration shared by the power stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// EMA coefficient in (0, 1); settling takes roughly `1 / alpha` samples.
    pub alpha: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self { alpha: 1e-7 }
    }
}

/// Per-sample power quantities for one processed block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerBlock {
    pub active: Vec<f32>,
    pub reactive: Vec<f32>,
    pub apparent: Vec<f32>,
    pub phi: Vec<f32>,
    pub rms_voltage: Vec<f32>,
    pub rms_current: Vec<f32>,
}

impl PowerBlock {
    fn with_capacity(len: usize) -> Self {
        Self {
            active: Vec::with_capacity(len),
            reactive: Vec::with_capacity(len),
            apparent: Vec::with_capacity(len),
            phi: Vec::with_capacity(len),
            rms_voltage: Vec::with_capacity(len),
            rms_current: Vec::with_capacity(len),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Channels in `POWER_SIGNALS` order.
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        vec![
            self.active,
            self.reactive,
            self.apparent,
            self.phi,
            self.rms_voltage,
            self.rms_current,
        ]
    }
}

/// Filter state behind both power stages.
#[derive(Debug, Clone)]
pub(crate) struct PowerEstimator {
    mean_square_u: ExponentialFilter,
    mean_square_i: ExponentialFilter,
    phase: ExponentialFilter,
    last_valid_phi: f64,
    held: usize,
}

impl PowerEstimator {
    pub(crate) fn new(alpha: f64) -> StageResult<Self> {
        Ok(Self {
            mean_square_u: ExponentialFilter::new(alpha)?,
            mean_square_i: ExponentialFilter::new(alpha)?,
            phase: ExponentialFilter::new(alpha)?,
            last_valid_phi: 0.0,
            held: 0,
        })
    }

    pub(crate) fn alpha(&self) -> f64 {
        self.phase.alpha()
    }

    /// Samples whose RMS update was skipped since the last call.
    pub(crate) fn take_held(&mut self) -> usize {
        std::mem::take(&mut self.held)
    }

    fn step(&mut self, voltage: f64, current: f64, raw_phi: f64, out: &mut PowerBlock) {
        // A non-finite pair would poison both mean squares for good.
        if voltage.is_finite() && current.is_finite() {
            self.mean_square_u.update(voltage * voltage);
            self.mean_square_i.update(current * current);
        } else {
            self.held += 1;
        }
        let rms_u = self.mean_square_u.value().sqrt();
        let rms_i = self.mean_square_i.value().sqrt();

        let raw_phi = if raw_phi.is_finite() {
            self.last_valid_phi = raw_phi;
            raw_phi
        } else {
            self.last_valid_phi
        };
        // Wrap first so the smoother never sees a 2π jump.
        let phi = self.phase.update(wrap_phase(raw_phi));

        let active = rms_u * rms_i * phi.cos();
        let reactive = rms_u * rms_i * phi.sin();

        out.active.push(active as f32);
        out.reactive.push(reactive as f32);
        out.apparent.push(active.hypot(reactive) as f32);
        out.phi.push(phi as f32);
        out.rms_voltage.push(rms_u as f32);
        out.rms_current.push(rms_i as f32);
    }

    pub(crate) fn process_real(
        &mut self,
        voltage: &[f32],
        current: &[f32],
        delta_phi: &[f32],
    ) -> PowerBlock {
        let mut out = PowerBlock::with_capacity(voltage.len());
        for ((&u, &i), &phi) in voltage.iter().zip(current).zip(delta_phi) {
            self.step(u as f64, i as f64, phi as f64, &mut out);
        }
        out
    }
}

/// Logs and counts one fault for a block with held RMS samples.
pub(crate) fn report_held(held: usize, logger: &LogManager, metrics: &MetricsRecorder) {
    if held > 0 {
        logger.fault(&format!(
            "held RMS over {} non-finite voltage/current samples",
            held
        ));
        metrics.record_fault();
    }
}

fn check_lengths(lengths: &[usize]) -> StageResult<usize> {
    let len = lengths.first().copied().unwrap_or(0);
    if lengths.iter().any(|&other| other != len) {
        return Err(StageError::InvalidInput(format!(
            "power inputs differ in length: {:?}",
            lengths
        )));
    }
    Ok(len)
}

/// Power stage over real voltage/current streams plus an upstream phase-difference stream.
pub struct PowerCalculator {
    estimator: PowerEstimator,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl PowerCalculator {
    pub fn new(config: &PowerConfig) -> StageResult<Self> {
        Ok(Self {
            estimator: PowerEstimator::new(config.alpha)?,
            logger: LogManager::new("power_calc"),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn alpha(&self) -> f64 {
        self.estimator.alpha()
    }

    /// Replaces the smoothing coefficient and restarts every estimate from zero.
    pub fn set_alpha(&mut self, alpha: f64) -> StageResult<()> {
        self.estimator = PowerEstimator::new(validate_alpha(alpha)?)?;
        self.logger.record(&format!("alpha set to {:e}", alpha));
        Ok(())
    }

    pub fn process(
        &mut self,
        voltage: &[f32],
        current: &[f32],
        delta_phi: &[f32],
    ) -> StageResult<PowerBlock> {
        let len = check_lengths(&[voltage.len(), current.len(), delta_phi.len()])?;
        let block = self.estimator.process_real(voltage, current, delta_phi);
        report_held(self.estimator.take_held(), &self.logger, &self.metrics);
        self.metrics.record_block(len);
        Ok(block)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for PowerCalculator {
    fn name(&self) -> &'static str {
        "power_calc"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(3)?;
        let sample_rate = input.blocks[0].sample_rate;
        let timestamp_ns = input.timestamp_ns();
        let block = self.process(
            &input.blocks[0].samples,
            &input.blocks[1].samples,
            &input.blocks[2].samples,
        )?;

        let mut metadata = StageMetadata::describe(sample_rate, &POWER_SIGNALS, &POWER_UNITS);
        metadata.timestamp_ns = timestamp_ns;
        Ok(StageOutput {
            channels: block.into_channels(),
            metadata,
        })
    }

    fn cleanup(&mut self) {
        let alpha = self.estimator.alpha();
        if let Ok(estimator) = PowerEstimator::new(alpha) {
            self.estimator = estimator;
        }
    }
}

/// Power stage over a voltage/current phasor pair.
///
/// RMS is taken over the in-phase (real) component, the phase difference is
/// `arg(u) - arg(i)`.
pub struct PhasorPowerCalculator {
    estimator: PowerEstimator,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl PhasorPowerCalculator {
    pub fn new(config: &PowerConfig) -> StageResult<Self> {
        Ok(Self {
            estimator: PowerEstimator::new(config.alpha)?,
            logger: LogManager::new("power_calc_phasor"),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn alpha(&self) -> f64 {
        self.estimator.alpha()
    }

    pub fn set_alpha(&mut self, alpha: f64) -> StageResult<()> {
        self.estimator = PowerEstimator::new(validate_alpha(alpha)?)?;
        self.logger.record(&format!("alpha set to {:e}", alpha));
        Ok(())
    }

    pub fn process(
        &mut self,
        voltage: &[Complex32],
        current: &[Complex32],
    ) -> StageResult<PowerBlock> {
        let len = check_lengths(&[voltage.len(), current.len()])?;
        let mut out = PowerBlock::with_capacity(len);
        for (u, i) in voltage.iter().zip(current) {
            let raw_phi = u.arg() as f64 - i.arg() as f64;
            self.estimator.step(u.re as f64, i.re as f64, raw_phi, &mut out);
        }
        report_held(self.estimator.take_held(), &self.logger, &self.metrics);
        self.metrics.record_block(len);
        Ok(out)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for PhasorPowerCalculator {
    fn name(&self) -> &'static str {
        "power_calc_phasor"
    }

    /// Ports: voltage real, voltage imaginary, current real, current imaginary.
    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(4)?;
        let sample_rate = input.blocks[0].sample_rate;
        let timestamp_ns = input.timestamp_ns();
        let zip_complex = |re: &[f32], im: &[f32]| -> Vec<Complex32> {
            re.iter()
                .zip(im)
                .map(|(&re, &im)| Complex32::new(re, im))
                .collect()
        };
        let voltage = zip_complex(&input.blocks[0].samples, &input.blocks[1].samples);
        let current = zip_complex(&input.blocks[2].samples, &input.blocks[3].samples);
        let block = self.process(&voltage, &current)?;

        let mut metadata = StageMetadata::describe(sample_rate, &POWER_SIGNALS, &POWER_UNITS);
        metadata.timestamp_ns = timestamp_ns;
        Ok(StageOutput {
            channels: block.into_channels(),
            metadata,
        })
    }

    fn cleanup(&mut self) {
        let alpha = self.estimator.alpha();
        if let Ok(estimator) = PowerEstimator::new(alpha) {
            self.estimator = estimator;
        }
    }
}
