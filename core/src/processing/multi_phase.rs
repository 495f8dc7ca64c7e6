use crate::prelude::{
    validate_alpha, ProcessingStage, StageError, StageInput, StageMetadata, StageOutput,
    StageResult,
};
use crate::processing::power::{report_held, PowerBlock, PowerConfig, PowerEstimator};
use crate::telemetry::{LogManager, MetricsRecorder};

pub const PHASES: usize = 3;

pub const MULTI_PHASE_SIGNALS: [&str; 15] = [
    "P_L1", "Q_L1", "S_L1", "phi_L1", "P_L2", "Q_L2", "S_L2", "phi_L2", "P_L3", "Q_L3", "S_L3",
    "phi_L3", "P_acc", "Q_acc", "S_acc",
];
pub const MULTI_PHASE_UNITS: [&str; 15] = [
    "W", "var", "VA", "rad", "W", "var", "VA", "rad", "W", "var", "VA", "rad", "W", "var", "VA",
];

/// Results for one block: the three phases plus their combined totals.
#[derive(Debug, Clone, Default)]
pub struct MultiPhaseBlock {
    pub phases: Vec<PowerBlock>,
    pub active_total: Vec<f32>,
    pub reactive_total: Vec<f32>,
    pub apparent_total: Vec<f32>,
}

impl MultiPhaseBlock {
    /// Channels in `MULTI_PHASE_SIGNALS` order.
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        let mut channels = Vec::with_capacity(MULTI_PHASE_SIGNALS.len());
        for phase in self.phases {
            channels.push(phase.active);
            channels.push(phase.reactive);
            channels.push(phase.apparent);
            channels.push(phase.phi);
        }
        channels.push(self.active_total);
        channels.push(self.reactive_total);
        channels.push(self.apparent_total);
        channels
    }
}

/// Sample-wise sum of the three per-phase active powers.
pub fn accumulate_active_power(p1: &[f32], p2: &[f32], p3: &[f32]) -> Vec<f32> {
    sum_phases(p1, p2, p3)
}

/// Sample-wise sum of the three per-phase reactive powers.
pub fn accumulate_reactive_power(q1: &[f32], q2: &[f32], q3: &[f32]) -> Vec<f32> {
    sum_phases(q1, q2, q3)
}

/// Combined apparent power `sqrt(P_acc^2 + Q_acc^2)`.
///
/// This differs from the plain sum of per-phase apparent powers whenever the
/// phases carry different power factors.
pub fn accumulate_apparent_power(active_total: &[f32], reactive_total: &[f32]) -> Vec<f32> {
    active_total
        .iter()
        .zip(reactive_total)
        .map(|(&p, &q)| (p as f64).hypot(q as f64) as f32)
        .collect()
}

fn sum_phases(a: &[f32], b: &[f32], c: &[f32]) -> Vec<f32> {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((&a, &b), &c)| a + b + c)
        .collect()
}

/// Three-phase power stage; every phase owns its own filter state.
///
/// Ports: `u_L1, i_L1, phi_L1, u_L2, i_L2, phi_L2, u_L3, i_L3, phi_L3`.
pub struct MultiPhasePowerCalculator {
    phases: Vec<PowerEstimator>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl MultiPhasePowerCalculator {
    pub fn new(config: &PowerConfig) -> StageResult<Self> {
        Ok(Self {
            phases: Self::fresh_phases(config.alpha)?,
            logger: LogManager::new("power_calc_mul_ph"),
            metrics: MetricsRecorder::new(),
        })
    }

    fn fresh_phases(alpha: f64) -> StageResult<Vec<PowerEstimator>> {
        (0..PHASES).map(|_| PowerEstimator::new(alpha)).collect()
    }

    pub fn alpha(&self) -> f64 {
        self.phases[0].alpha()
    }

    pub fn set_alpha(&mut self, alpha: f64) -> StageResult<()> {
        self.phases = Self::fresh_phases(validate_alpha(alpha)?)?;
        self.logger.record(&format!("alpha set to {:e}", alpha));
        Ok(())
    }

    /// `inputs[k]` holds `(voltage, current, delta_phi)` for phase `k`.
    pub fn process(
        &mut self,
        inputs: [(&[f32], &[f32], &[f32]); PHASES],
    ) -> StageResult<MultiPhaseBlock> {
        let len = inputs[0].0.len();
        let consistent = inputs
            .iter()
            .all(|(u, i, phi)| u.len() == len && i.len() == len && phi.len() == len);
        if !consistent {
            return Err(StageError::InvalidInput("phase inputs differ in length".into()));
        }

        let phases: Vec<PowerBlock> = self
            .phases
            .iter_mut()
            .zip(inputs.iter())
            .map(|(estimator, (u, i, phi))| estimator.process_real(u, i, phi))
            .collect();
        let held: usize = self.phases.iter_mut().map(PowerEstimator::take_held).sum();
        report_held(held, &self.logger, &self.metrics);

        let active_total =
            accumulate_active_power(&phases[0].active, &phases[1].active, &phases[2].active);
        let reactive_total = accumulate_reactive_power(
            &phases[0].reactive,
            &phases[1].reactive,
            &phases[2].reactive,
        );
        let apparent_total = accumulate_apparent_power(&active_total, &reactive_total);

        self.metrics.record_block(len);
        Ok(MultiPhaseBlock {
            phases,
            active_total,
            reactive_total,
            apparent_total,
        })
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for MultiPhasePowerCalculator {
    fn name(&self) -> &'static str {
        "power_calc_mul_ph"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(3 * PHASES)?;
        let sample_rate = input.blocks[0].sample_rate;
        let timestamp_ns = input.timestamp_ns();
        let port = |idx: usize| input.blocks[idx].samples.as_slice();
        let block = self.process([
            (port(0), port(1), port(2)),
            (port(3), port(4), port(5)),
            (port(6), port(7), port(8)),
        ])?;

        let mut metadata =
            StageMetadata::describe(sample_rate, &MULTI_PHASE_SIGNALS, &MULTI_PHASE_UNITS);
        metadata.timestamp_ns = timestamp_ns;
        Ok(StageOutput {
            channels: block.into_channels(),
            metadata,
        })
    }

    fn cleanup(&mut self) {
        if let Ok(phases) = Self::fresh_phases(self.alpha()) {
            self.phases = phases;
        }
    }
}
