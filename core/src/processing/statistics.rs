use crate::math::stats::RunningMoments;
use crate::prelude::{
    ProcessingStage, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::{LogManager, MetricsRecorder};
use serde::{Deserialize, Serialize};

pub const STATISTICS_SIGNALS: [&str; 4] = ["mean", "min", "max", "std_deviation"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Window length; one result per `decimation` input samples.
    pub decimation: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { decimation: 1_000 }
    }
}

/// Summary of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStatistics {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    pub std_deviation: f32,
}

impl WindowStatistics {
    fn from_moments(moments: &RunningMoments) -> Self {
        Self {
            mean: moments.mean() as f32,
            min: moments.min() as f32,
            max: moments.max() as f32,
            std_deviation: moments.std_deviation() as f32,
        }
    }
}

/// Computes statistics over a complete slice in one pass.
pub fn calculate_statistics(samples: &[f32]) -> Option<WindowStatistics> {
    if samples.is_empty() {
        return None;
    }
    let mut moments = RunningMoments::new();
    for &sample in samples {
        moments.push(sample as f64);
    }
    Some(WindowStatistics::from_moments(&moments))
}

/// Decimating stage producing mean, min, max and population standard deviation per window.
///
/// Windows may straddle blocks; the partially filled window is carried over.
pub struct StatisticsAggregator {
    decimation: usize,
    window: RunningMoments,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl StatisticsAggregator {
    pub fn new(config: &StatisticsConfig) -> StageResult<Self> {
        if config.decimation == 0 {
            return Err(StageError::InvalidConfig(
                "statistics decimation must be positive".into(),
            ));
        }
        Ok(Self {
            decimation: config.decimation,
            window: RunningMoments::new(),
            logger: LogManager::new("statistics"),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<WindowStatistics> {
        let mut results = Vec::with_capacity(samples.len() / self.decimation + 1);
        for &sample in samples {
            self.window.push(sample as f64);
            if self.window.count() as usize == self.decimation {
                results.push(WindowStatistics::from_moments(&self.window));
                self.window.reset();
            }
        }
        self.metrics.record_block(samples.len());
        results
    }

    /// Samples accumulated towards the next, still incomplete window.
    pub fn pending(&self) -> usize {
        self.window.count() as usize
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for StatisticsAggregator {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        input.expect_ports(1)?;
        let block = &input.blocks[0];
        let results = self.process(&block.samples);

        let mut channels = vec![Vec::with_capacity(results.len()); STATISTICS_SIGNALS.len()];
        for result in &results {
            channels[0].push(result.mean);
            channels[1].push(result.min);
            channels[2].push(result.max);
            channels[3].push(result.std_deviation);
        }

        let output_rate = block.sample_rate / self.decimation as f32;
        let mut metadata = StageMetadata::describe(output_rate, &STATISTICS_SIGNALS, &[""; 4]);
        metadata.timestamp_ns = block.timestamp_ns;
        Ok(StageOutput { channels, metadata })
    }

    fn cleanup(&mut self) {
        if self.window.count() > 0 {
            self.logger.record(&format!(
                "discarding {} samples of an incomplete window",
                self.window.count()
            ));
        }
        self.window.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::SampleBlock;

    fn aggregator(decimation: usize) -> StatisticsAggregator {
        StatisticsAggregator::new(&StatisticsConfig { decimation }).unwrap()
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-3,
            "{} differs from {}",
            actual,
            expected
        );
    }

    #[test]
    fn positive_samples() {
        let stats = calculate_statistics(&[1.0, 3.0, 2.0]).unwrap();
        assert_close(stats.mean, 2.0);
        assert_close(stats.min, 1.0);
        assert_close(stats.max, 3.0);
        assert_close(stats.std_deviation, 0.8165);
    }

    #[test]
    fn negative_samples() {
        let stats = calculate_statistics(&[-1.0, -3.0, -2.0]).unwrap();
        assert_close(stats.mean, -2.0);
        assert_close(stats.min, -3.0);
        assert_close(stats.max, -1.0);
        assert_close(stats.std_deviation, 0.8165);
    }

    #[test]
    fn mixed_sign_samples() {
        let stats = calculate_statistics(&[1.0, 0.0, -1.0]).unwrap();
        assert_close(stats.mean, 0.0);
        assert_close(stats.std_deviation, 0.8165);
    }

    #[test]
    fn single_sample_has_no_spread() {
        let stats = calculate_statistics(&[1.0]).unwrap();
        assert_close(stats.mean, 1.0);
        assert_eq!(stats.std_deviation, 0.0);
        assert!(calculate_statistics(&[]).is_none());
    }

    #[test]
    fn constant_window_is_exact() {
        let mut stage = aggregator(64);
        let results = stage.process(&[230.5; 64]);
        assert_eq!(
            results,
            vec![WindowStatistics {
                mean: 230.5,
                min: 230.5,
                max: 230.5,
                std_deviation: 0.0,
            }]
        );
    }

    #[test]
    fn windows_straddle_blocks() {
        let mut stage = aggregator(4);
        assert!(stage.process(&[1.0, 2.0, 3.0]).is_empty());
        assert_eq!(stage.pending(), 3);
        let results = stage.process(&[4.0, 10.0, 10.0, 10.0, 10.0, 7.0]);
        assert_eq!(results.len(), 2);
        assert_close(results[0].mean, 2.5);
        assert_close(results[0].std_deviation, 1.25f32.sqrt());
        assert_close(results[1].mean, 10.0);
        assert_eq!(stage.pending(), 1);
    }

    #[test]
    fn large_offset_window_keeps_precision() {
        let mut stage = aggregator(1_000);
        let samples: Vec<f32> = (0..1_000)
            .map(|n| 100_000.0 + if n % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let results = stage.process(&samples);
        assert_close(results[0].mean, 100_000.0);
        assert_close(results[0].std_deviation, 1.0);
    }

    #[test]
    fn zero_decimation_is_rejected() {
        assert!(matches!(
            StatisticsAggregator::new(&StatisticsConfig { decimation: 0 }),
            Err(StageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stage_output_rate_is_decimated() {
        let mut stage = aggregator(10);
        let output = stage
            .execute(StageInput::single(SampleBlock::new(vec![2.0; 25], 1_000.0)))
            .unwrap();
        assert_eq!(output.metadata.sample_rate, 100.0);
        assert_eq!(output.channels.len(), 4);
        assert_eq!(output.channels[0], vec![2.0, 2.0]);
        stage.cleanup();
        assert_eq!(stage.pending(), 0);
    }
}
