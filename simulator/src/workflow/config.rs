use crate::generator::three_phase::GeneratorConfig;
use anyhow::Context;
use pqcore::processing::{
    IntegrationConfig, MainsFrequencyConfig, PowerConfig, SpectrumConfig, StatisticsConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete description of one simulated flowgraph run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowgraphConfig {
    /// Blocks to generate; 0 runs until interrupted.
    pub blocks: usize,
    pub generator: GeneratorConfig,
    pub power: PowerConfig,
    pub mains_frequency: MainsFrequencyConfig,
    pub statistics: StatisticsConfig,
    pub integration: IntegrationConfig,
    pub spectrum: SpectrumConfig,
}

impl Default for FlowgraphConfig {
    fn default() -> Self {
        Self {
            blocks: 0,
            generator: GeneratorConfig::default(),
            // Settles within a few seconds at the generator's default rate.
            power: PowerConfig { alpha: 1e-4 },
            mains_frequency: MainsFrequencyConfig::default(),
            statistics: StatisticsConfig::default(),
            integration: IntegrationConfig::default(),
            spectrum: SpectrumConfig::default(),
        }
        .aligned()
    }
}

impl FlowgraphConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading flowgraph config {}", path_ref.display()))?;
        let config: FlowgraphConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing flowgraph config {}", path_ref.display()))?;
        Ok(config.aligned())
    }

    pub fn from_args(
        blocks: usize,
        sample_rate: f32,
        mains_frequency: f64,
        noise: f64,
        checkpoint: PathBuf,
    ) -> Self {
        let mut config = Self {
            blocks,
            ..Default::default()
        };
        config.generator.sample_rate = sample_rate;
        config.generator.mains_frequency = mains_frequency;
        config.generator.noise = noise;
        config.integration.checkpoint_path = checkpoint;
        config.aligned()
    }

    /// Stages fed straight from the source run at the source's rate.
    fn aligned(mut self) -> Self {
        self.mains_frequency.sample_rate = self.generator.sample_rate;
        self.integration.sample_rate = self.generator.sample_rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_aligns_stage_rates() {
        let cfg = FlowgraphConfig::from_args(10, 20_000.0, 50.0, 0.01, "e.txt".into());
        assert_eq!(cfg.mains_frequency.sample_rate, 20_000.0);
        assert_eq!(cfg.integration.sample_rate, 20_000.0);
        assert_eq!(cfg.integration.checkpoint_path, PathBuf::from("e.txt"));
    }

    #[test]
    fn config_load_reads_partial_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"blocks: 3\ngenerator:\n  sample_rate: 4000.0\n  noise: 0.02\nstatistics:\n  decimation: 400\npower:\n  alpha: 0.001\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = FlowgraphConfig::load(&path).unwrap();
        assert_eq!(cfg.blocks, 3);
        assert_eq!(cfg.statistics.decimation, 400);
        assert_eq!(cfg.power.alpha, 0.001);
        assert_eq!(cfg.mains_frequency.sample_rate, 4_000.0);
        assert_eq!(cfg.mains_frequency.high_threshold, 100.0);
        assert_eq!(cfg.integration.reset_period_secs, 30 * 24 * 60 * 60);
    }

    #[test]
    fn config_load_reports_bad_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"blocks: [not, a, number]\n").unwrap();
        let path = temp.into_temp_path();
        let err = FlowgraphConfig::load(&path).unwrap_err();
        assert!(err.to_string().starts_with("parsing flowgraph config"));
    }
}
