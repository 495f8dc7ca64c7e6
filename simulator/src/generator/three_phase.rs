use anyhow::ensure;
use pqcore::math::standard_normal;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Configuration for the synthetic three-phase mains source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sample_rate: f32,
    pub block_size: usize,
    pub mains_frequency: f64,
    /// Peak voltage per phase.
    pub voltage_amplitude: f64,
    /// Peak current per phase.
    pub current_amplitude: f64,
    /// Current lag behind voltage for each phase, in degrees.
    pub current_lag_deg: [f64; 3],
    /// Gaussian noise standard deviation relative to the signal amplitude.
    pub noise: f64,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 10_000.0,
            block_size: 1_000,
            mains_frequency: 50.0,
            voltage_amplitude: 325.0,
            current_amplitude: 10.0,
            current_lag_deg: [0.0, 30.0, 60.0],
            noise: 0.0,
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.sample_rate.is_finite() && self.sample_rate > 0.0,
            "generator sample rate must be positive, got {}",
            self.sample_rate
        );
        ensure!(self.block_size > 0, "generator block size must be positive");
        ensure!(
            self.mains_frequency > 0.0 && self.mains_frequency < self.sample_rate as f64 / 2.0,
            "mains frequency {} Hz is not representable at {} Hz",
            self.mains_frequency,
            self.sample_rate
        );
        ensure!(self.noise >= 0.0, "noise level must not be negative");
        Ok(())
    }
}

/// One phase worth of samples: voltage, current and their phase difference.
#[derive(Debug, Clone, Default)]
pub struct PhaseSamples {
    pub voltage: Vec<f32>,
    pub current: Vec<f32>,
    pub delta_phi: Vec<f32>,
}

/// Endless source of three-phase voltage and current blocks.
///
/// Phases are spaced by 120 degrees and the phase difference channel carries
/// the configured current lag in radians, as a phase detector would report it.
pub struct ThreePhaseSource {
    config: GeneratorConfig,
    rng: StdRng,
    sample_index: u64,
}

impl ThreePhaseSource {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            sample_index: 0,
            config,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn next_block(&mut self) -> [PhaseSamples; 3] {
        let len = self.config.block_size;
        let omega = TAU * self.config.mains_frequency / self.config.sample_rate as f64;
        let voltage_sigma = self.config.noise * self.config.voltage_amplitude;
        let current_sigma = self.config.noise * self.config.current_amplitude;

        let mut phases: [PhaseSamples; 3] = Default::default();
        for (idx, phase) in phases.iter_mut().enumerate() {
            let offset = idx as f64 * TAU / 3.0;
            let lag = self.config.current_lag_deg[idx].to_radians();
            phase.voltage.reserve(len);
            phase.current.reserve(len);
            for n in 0..len {
                let angle = omega * (self.sample_index + n as u64) as f64 - offset;
                let u = self.config.voltage_amplitude * angle.sin()
                    + voltage_sigma * standard_normal(&mut self.rng);
                let i = self.config.current_amplitude * (angle - lag).sin()
                    + current_sigma * standard_normal(&mut self.rng);
                phase.voltage.push(u as f32);
                phase.current.push(i as f32);
            }
            phase.delta_phi = vec![lag as f32; len];
        }
        self.sample_index += len as u64;
        phases
    }
}
