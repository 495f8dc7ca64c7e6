use crate::math::ema::ExponentialFilter;
use crate::prelude::{
    validate_alpha, ProcessingStage, StageError, StageInput, StageMetadata, StageOutput,
    StageResult,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use serde::{Deserialize, Serialize};

/// Thresholds and smoothing for the mains frequency detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainsFrequencyConfig {
    pub sample_rate: f32,
    pub low_threshold: f32,
    pub high_threshold: f32,
    pub alpha: f64,
    /// Longest half-period, in seconds, before the watchdog resets the counters.
    pub timeout_seconds: f64,
    /// Value reported until the first complete half-period has been measured.
    pub nominal_frequency: f64,
}

impl Default for MainsFrequencyConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2_000_000.0,
            low_threshold: -100.0,
            high_threshold: 100.0,
            alpha: 0.007,
            timeout_seconds: 5.0,
            nominal_frequency: 50.0,
        }
    }
}

impl MainsFrequencyConfig {
    pub fn validate(&self) -> StageResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.low_threshold.is_finite() && self.high_threshold.is_finite())
            || self.low_threshold >= self.high_threshold
        {
            return Err(StageError::InvalidConfig(format!(
                "thresholds must satisfy low < high, got ({}, {})",
                self.low_threshold, self.high_threshold
            )));
        }
        if !(self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "watchdog timeout must be positive, got {}",
                self.timeout_seconds
            )));
        }
        validate_alpha(self.alpha)?;
        Ok(())
    }
}

/// Which half-wave the signal was last seen entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfWave {
    Upper,
    Lower,
}

/// Position of a sample relative to the hysteresis band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Above,
    Between,
    Below,
}

impl Band {
    /// `None` for samples that compare false against both thresholds (NaN).
    pub fn classify(sample: f32, low: f32, high: f32) -> Option<Band> {
        if sample >= high {
            Some(Band::Above)
        } else if sample < low {
            Some(Band::Below)
        } else if sample >= low && sample < high {
            Some(Band::Between)
        } else {
            None
        }
    }
}

/// Labelled edges of the detector automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Lower → Upper; closes the lower half-period.
    UpperCrossing,
    HoldUpper,
    /// Upper → Lower; closes the upper half-period.
    LowerCrossing,
    HoldLower,
}

impl HalfWave {
    pub fn transition(self, band: Band) -> Transition {
        match (self, band) {
            (HalfWave::Lower, Band::Above) => Transition::UpperCrossing,
            (HalfWave::Upper, Band::Above | Band::Between) => Transition::HoldUpper,
            (HalfWave::Upper, Band::Below) => Transition::LowerCrossing,
            (HalfWave::Lower, Band::Below | Band::Between) => Transition::HoldLower,
        }
    }
}

/// Measures the mains frequency by timing half-periods between threshold crossings.
///
/// Emits one smoothed estimate per input sample. The first crossing after
/// start-up or after a watchdog reset only arms the detector, since the
/// half-period it would close was not observed from its beginning.
pub struct MainsFrequencyDetector {
    config: MainsFrequencyConfig,
    state: HalfWave,
    upper_count: u64,
    lower_count: u64,
    armed: bool,
    half_period_frequency: f64,
    average: ExponentialFilter,
    timeout_samples: f64,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl MainsFrequencyDetector {
    pub fn new(config: MainsFrequencyConfig) -> StageResult<Self> {
        config.validate()?;
        let average = ExponentialFilter::with_initial(config.alpha, config.nominal_frequency)?;
        let timeout_samples = config.sample_rate as f64 * config.timeout_seconds;
        Ok(Self {
            state: HalfWave::Lower,
            upper_count: 0,
            lower_count: 0,
            armed: false,
            half_period_frequency: 0.0,
            average,
            timeout_samples,
            logger: LogManager::new("mains_frequency_calc"),
            metrics: MetricsRecorder::new(),
            config,
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(samples.len());
        let mut unclassified = 0usize;

        for &sample in samples {
            match Band::classify(sample, self.config.low_threshold, self.config.high_threshold) {
                Some(band) => self.apply(self.state.transition(band)),
                None => unclassified += 1,
            }

            if self.watchdog_expired() {
                self.logger.fault(&format!(
                    "no threshold crossing within {} s; resetting half-period counters",
                    self.config.timeout_seconds
                ));
                self.metrics.record_fault();
                self.upper_count = 0;
                self.lower_count = 0;
                self.armed = false;
            }

            out.push(self.average.value() as f32);
        }

        if unclassified > 0 {
            self.logger.fault(&format!(
                "{} samples matched no threshold band; check thresholds and input",
                unclassified
            ));
            self.metrics.record_fault();
        }
        self.metrics.record_block(samples.len());
        out
    }

    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::UpperCrossing => {
                self.close_half_period(self.lower_count);
                self.lower_count = 0;
                self.state = HalfWave::Upper;
                self.upper_count += 1;
            }
            Transition::HoldUpper => self.upper_count += 1,
            Transition::LowerCrossing => {
                self.close_half_period(self.upper_count);
                self.upper_count = 0;
                self.state = HalfWave::Lower;
                self.lower_count += 1;
            }
            Transition::HoldLower => self.lower_count += 1,
        }
    }

    fn close_half_period(&mut self, count: u64) {
        if !self.armed || count == 0 {
            self.armed = true;
            return;
        }
        let half_period_seconds = count as f64 / self.config.sample_rate as f64;
        self.half_period_frequency = 1.0 / (2.0 * half_period_seconds);
        self.average.update(self.half_period_frequency);
    }

    fn watchdog_expired(&self) -> bool {
        self.upper_count as f64 > self.timeout_samples
            || self.lower_count as f64 > self.timeout_samples
    }

    pub fn average_frequency(&self) -> f64 {
        self.average.value()
    }

    /// Raw estimate from the most recently closed half-period.
    pub fn half_period_frequency(&self) -> f64 {
        self.half_period_frequency
    }

    pub fn state(&self) -> HalfWave {
        self.state
    }

    /// `(upper, lower)` half-period sample counters.
    pub fn counters(&self) -> (u64, u64) {
        (self.upper_count, self.lower_count)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for MainsFrequencyDetector {
    fn name(&self) -> &'static str {
        "mains_frequency_calc"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(1)?;
        let block = &input.blocks[0];
        let frequency = self.process(&block.samples);

        let mut metadata = StageMetadata::describe(block.sample_rate, &["f_mains"], &["Hz"]);
        metadata.timestamp_ns = block.timestamp_ns;
        Ok(StageOutput {
            channels: vec![frequency],
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.state = HalfWave::Lower;
        self.upper_count = 0;
        self.lower_count = 0;
        self.armed = false;
        self.half_period_frequency = 0.0;
        self.average.reset(self.config.nominal_frequency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::noise::standard_normal;
    use rand::{rngs::StdRng, SeedableRng};
    use std::f64::consts::PI;

    const SAMPLE_RATE: f32 = 2_000_000.0;
    const BLOCK: usize = 1 << 16;

    fn detector(sample_rate: f32, timeout_seconds: f64) -> MainsFrequencyDetector {
        MainsFrequencyDetector::new(MainsFrequencyConfig {
            sample_rate,
            timeout_seconds,
            ..Default::default()
        })
        .unwrap()
    }

    /// Feeds `seconds` of a sine (plus optional Gaussian noise) in fixed blocks.
    fn run_sine(
        detector: &mut MainsFrequencyDetector,
        start: u64,
        seconds: f64,
        frequency: f64,
        amplitude: f64,
        noise: Option<(f64, &mut StdRng)>,
    ) -> Vec<f32> {
        let sample_rate = detector.config.sample_rate as f64;
        let total = (seconds * sample_rate) as u64;
        let mut noise = noise;
        let mut estimates = Vec::new();
        let mut n = start;
        while n < start + total {
            let end = (n + BLOCK as u64).min(start + total);
            let block: Vec<f32> = (n..end)
                .map(|idx| {
                    let mut value =
                        amplitude * (2.0 * PI * frequency * idx as f64 / sample_rate).sin();
                    if let Some((sigma, rng)) = noise.as_mut() {
                        value += *sigma * standard_normal(&mut **rng);
                    }
                    value as f32
                })
                .collect();
            let out = detector.process(&block);
            estimates.push(*out.last().unwrap());
            n = end;
        }
        estimates
    }

    fn assert_converges(estimates: &[f32], expected: f64, tolerance: f64) {
        let settled = *estimates.last().unwrap() as f64;
        assert!(
            (settled - expected).abs() < tolerance,
            "settled at {} Hz, expected {} ± {}",
            settled,
            expected,
            tolerance
        );
        let tail = &estimates[estimates.len() / 2..];
        assert!(tail
            .iter()
            .all(|&f| (f as f64 - expected).abs() < 10.0 * tolerance));
    }

    #[test]
    fn automaton_covers_every_state_and_band() {
        use Band::*;
        use HalfWave::*;
        assert_eq!(Lower.transition(Above), Transition::UpperCrossing);
        assert_eq!(Upper.transition(Above), Transition::HoldUpper);
        assert_eq!(Upper.transition(Between), Transition::HoldUpper);
        assert_eq!(Upper.transition(Below), Transition::LowerCrossing);
        assert_eq!(Lower.transition(Below), Transition::HoldLower);
        assert_eq!(Lower.transition(Between), Transition::HoldLower);
    }

    #[test]
    fn band_edges_follow_threshold_inclusivity() {
        assert_eq!(Band::classify(100.0, -100.0, 100.0), Some(Band::Above));
        assert_eq!(Band::classify(-100.0, -100.0, 100.0), Some(Band::Between));
        assert_eq!(Band::classify(-100.5, -100.0, 100.0), Some(Band::Below));
        assert_eq!(Band::classify(f32::NAN, -100.0, 100.0), None);
    }

    #[test]
    fn noiseless_55_hz_converges() {
        let mut detector = detector(SAMPLE_RATE, 5.0);
        let estimates = run_sine(&mut detector, 0, 10.0, 55.0, 325.0, None);
        assert_converges(&estimates, 55.0, 0.02);
    }

    #[test]
    fn one_percent_noise_stays_bounded() {
        let mut detector = detector(SAMPLE_RATE, 5.0);
        let mut rng = StdRng::seed_from_u64(1);
        let estimates = run_sine(&mut detector, 0, 10.0, 55.0, 325.0, Some((3.25, &mut rng)));
        assert_converges(&estimates, 55.0, 0.05);
    }

    #[test]
    fn five_percent_noise_stays_bounded() {
        let mut detector = detector(SAMPLE_RATE, 5.0);
        let mut rng = StdRng::seed_from_u64(5);
        let estimates = run_sine(&mut detector, 0, 10.0, 55.0, 325.0, Some((16.25, &mut rng)));
        assert_converges(&estimates, 55.0, 0.25);
    }

    #[test]
    fn stalled_signal_holds_last_average() {
        let sample_rate = 10_000.0;
        let mut detector = detector(sample_rate, 1.0);
        run_sine(&mut detector, 0, 8.0, 60.0, 325.0, None);
        let before = detector.average_frequency();
        assert!((before - 60.0).abs() < 0.1);

        let stalled = detector.process(&vec![0.0; 30_000]);
        assert!(stalled.iter().all(|&f| f == before as f32));
        assert!(detector.metrics().snapshot().faults >= 2);
        let (upper, lower) = detector.counters();
        assert!(upper as f64 <= sample_rate as f64 && lower as f64 <= sample_rate as f64);

        // Recovery must not feed the partial first half-period into the average.
        let resumed = run_sine(&mut detector, 0, 1.0, 60.0, 325.0, None);
        assert!(resumed.iter().all(|&f| (f as f64 - 60.0).abs() < 0.1));
    }

    #[test]
    fn nan_samples_are_reported_and_ignored() {
        let mut detector = detector(1_000.0, 5.0);
        let out = detector.process(&[f32::NAN; 16]);
        assert!(out.iter().all(|&f| f == 50.0));
        assert_eq!(detector.counters(), (0, 0));
        assert_eq!(detector.state(), HalfWave::Lower);
        assert_eq!(detector.metrics().snapshot().faults, 1);
    }

    #[test]
    fn invalid_configuration_fails_construction() {
        let inverted = MainsFrequencyConfig {
            low_threshold: 100.0,
            high_threshold: -100.0,
            ..Default::default()
        };
        assert!(MainsFrequencyDetector::new(inverted).is_err());

        let equal = MainsFrequencyConfig {
            low_threshold: 5.0,
            high_threshold: 5.0,
            ..Default::default()
        };
        assert!(MainsFrequencyDetector::new(equal).is_err());

        let bad_alpha = MainsFrequencyConfig {
            alpha: 1.0,
            ..Default::default()
        };
        assert!(MainsFrequencyDetector::new(bad_alpha).is_err());

        let no_rate = MainsFrequencyConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert!(MainsFrequencyDetector::new(no_rate).is_err());
    }

    #[test]
    fn stage_output_is_not_decimated() {
        let mut detector = detector(1_000.0, 5.0);
        let input = StageInput::single(
            crate::prelude::SampleBlock::new(vec![0.0; 32], 1_000.0).with_timestamp(7),
        );
        let output = detector.execute(input).unwrap();
        assert_eq!(output.channels[0].len(), 32);
        assert_eq!(output.metadata.signal_names, vec!["f_mains".to_string()]);
        assert_eq!(output.metadata.timestamp_ns, Some(7));
    }
}
