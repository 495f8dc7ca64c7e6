use crate::generator::three_phase::{PhaseSamples, ThreePhaseSource};
use crate::workflow::config::FlowgraphConfig;
use anyhow::Context;
use pqcore::prelude::{ProcessingStage, SampleBlock, StageInput, StageOutput};
use pqcore::processing::{
    EnergyIntegrator, MainsFrequencyDetector, MultiPhasePowerCalculator, SpectrumStage,
    StatisticsAggregator,
};
use pqcore::publish::{PublishSink, ResultObserver, SinkKind, SinkRegistry};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Final values of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub blocks: usize,
    pub samples: usize,
    pub active_power: Option<f32>,
    pub reactive_power: Option<f32>,
    pub apparent_power: Option<f32>,
    pub mains_frequency: Option<f32>,
    pub energy: f64,
    pub statistics_windows: usize,
    pub spectra: usize,
}

struct Flowgraph {
    source: ThreePhaseSource,
    power: MultiPhasePowerCalculator,
    mains: MainsFrequencyDetector,
    statistics: StatisticsAggregator,
    integration: EnergyIntegrator,
    spectrum: SpectrumStage,
    power_sink: PublishSink,
    mains_sink: PublishSink,
    statistics_sink: PublishSink,
    energy_sink: PublishSink,
    spectrum_sink: PublishSink,
}

/// Drives the three-phase flowgraph: source, power, mains frequency,
/// statistics, energy and spectrum stages, each feeding its own sink.
#[derive(Clone)]
pub struct Runner {
    config: FlowgraphConfig,
}

impl Runner {
    pub fn new(config: FlowgraphConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlowgraphConfig {
        &self.config
    }

    /// Runs until the configured block count is reached or `stop` is raised.
    ///
    /// `observer` is attached to every sink the registry lists once the
    /// flowgraph is built. Sinks leave the registry when the run ends.
    pub fn run(
        &self,
        registry: &SinkRegistry,
        observer: Arc<dyn ResultObserver>,
        stop: &AtomicBool,
    ) -> anyhow::Result<RunSummary> {
        let mut graph = self.build(registry)?;
        for kind in [SinkKind::TimeDomain, SinkKind::FrequencyDomain] {
            for handle in registry.sinks(kind) {
                handle.subscribe(Arc::clone(&observer));
            }
        }
        drop(observer);

        let mut summary = RunSummary::default();
        while !stop.load(Ordering::Relaxed)
            && (self.config.blocks == 0 || summary.blocks < self.config.blocks)
        {
            let phases = graph.source.next_block();
            self.step(&mut graph, phases, &mut summary)
                .with_context(|| format!("processing block {}", summary.blocks))?;
            summary.blocks += 1;
        }

        graph.spectrum.cleanup();
        graph.statistics.cleanup();
        graph.integration.cleanup();
        summary.energy = graph.integration.cumulative_sum();
        log::info!(
            "flowgraph finished after {} blocks ({} samples)",
            summary.blocks,
            summary.samples
        );
        Ok(summary)
    }

    fn build(&self, registry: &SinkRegistry) -> anyhow::Result<Flowgraph> {
        let config = &self.config;
        let rate = config.generator.sample_rate;
        let statistics_rate = rate / config.statistics.decimation.max(1) as f32;
        let energy_rate = rate / config.integration.decimation.max(1) as f32;

        let source = ThreePhaseSource::new(config.generator.clone())
            .context("configuring three-phase source")?;
        let power = MultiPhasePowerCalculator::new(&config.power)
            .context("configuring multi-phase power stage")?;
        let mains = MainsFrequencyDetector::new(config.mains_frequency.clone())
            .context("configuring mains frequency stage")?;
        let statistics = StatisticsAggregator::new(&config.statistics)
            .context("configuring statistics stage")?;
        let integration = EnergyIntegrator::new(config.integration.clone())
            .context("configuring energy integrator")?;
        let spectrum =
            SpectrumStage::new(&config.spectrum).context("configuring spectrum stage")?;

        let power_sink = PublishSink::time_domain(
            registry,
            &["P_acc", "Q_acc", "S_acc"],
            &["W", "var", "VA"],
            rate,
        )?;
        let mains_sink = PublishSink::time_domain(registry, &["f_mains"], &["Hz"], rate)?;
        let statistics_sink = PublishSink::time_domain(
            registry,
            &["P_mean", "P_min", "P_max", "P_std_deviation"],
            &["W", "W", "W", "W"],
            statistics_rate,
        )?;
        let energy_sink = PublishSink::time_domain(registry, &["E"], &["Ws"], energy_rate)?;
        let spectrum_sink = PublishSink::frequency_domain(
            registry,
            &["U_L1_amplitude"],
            &["V"],
            rate / 2.0,
            rate / 2.0,
            spectrum.vector_size(),
        )?;

        Ok(Flowgraph {
            source,
            power,
            mains,
            statistics,
            integration,
            spectrum,
            power_sink,
            mains_sink,
            statistics_sink,
            energy_sink,
            spectrum_sink,
        })
    }

    fn step(
        &self,
        graph: &mut Flowgraph,
        phases: [PhaseSamples; 3],
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        let rate = self.config.generator.sample_rate;
        let voltage_l1 = phases[0].voltage.clone();
        summary.samples += voltage_l1.len();

        let mut ports = Vec::with_capacity(9);
        for phase in phases {
            ports.push(phase.voltage);
            ports.push(phase.current);
            ports.push(phase.delta_phi);
        }
        let power = graph
            .power
            .execute(StageInput::from_channels(ports, rate, None))?;
        let active = signal(&power, "P_acc")?;
        let reactive = signal(&power, "Q_acc")?;
        let apparent = signal(&power, "S_acc")?;
        summary.active_power = active.last().copied();
        summary.reactive_power = reactive.last().copied();
        summary.apparent_power = apparent.last().copied();
        graph
            .power_sink
            .publish(vec![active.clone(), reactive, apparent])?;

        let mains = graph
            .mains
            .execute(StageInput::single(SampleBlock::new(voltage_l1.clone(), rate)))?;
        summary.mains_frequency = mains.channels[0].last().copied();
        graph.mains_sink.publish(mains.channels)?;

        let statistics = graph
            .statistics
            .execute(StageInput::single(SampleBlock::new(active.clone(), rate)))?;
        summary.statistics_windows += statistics.channels[0].len();
        graph.statistics_sink.publish(statistics.channels)?;

        let energy = graph
            .integration
            .execute(StageInput::single(SampleBlock::new(active, rate)))?;
        graph.energy_sink.publish(energy.channels)?;

        let spectrum = graph
            .spectrum
            .execute(StageInput::single(SampleBlock::new(voltage_l1, rate)))?;
        summary.spectra += spectrum.channels[0].len() / graph.spectrum.vector_size();
        graph.spectrum_sink.publish(spectrum.channels)?;
        Ok(())
    }
}

fn signal(output: &StageOutput, name: &str) -> anyhow::Result<Vec<f32>> {
    output
        .channel(name)
        .map(<[f32]>::to_vec)
        .with_context(|| format!("stage output has no {} channel", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqcore::persistence::CheckpointStore;
    use pqcore::processing::PowerConfig;
    use pqcore::publish::PublishedResult;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn config(dir: &std::path::Path, blocks: usize) -> FlowgraphConfig {
        let mut config = FlowgraphConfig::from_args(
            blocks,
            10_000.0,
            50.0,
            0.0,
            dir.join("energy_checkpoint.txt"),
        );
        config.power = PowerConfig { alpha: 1e-3 };
        config.generator.block_size = 1_000;
        config
    }

    type Deliveries = Arc<Mutex<HashMap<String, usize>>>;

    fn counting_observer() -> (Deliveries, Arc<dyn ResultObserver>) {
        let counts: Deliveries = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::clone(&counts);
        let observer: Arc<dyn ResultObserver> = Arc::new(move |result: &PublishedResult| {
            *sink
                .lock()
                .unwrap()
                .entry(result.signal_names[0].clone())
                .or_insert(0) += 1;
        });
        (counts, observer)
    }

    #[test]
    fn runner_settles_on_three_phase_load() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (counts, observer) = counting_observer();
        let runner = Runner::new(config(dir.path(), 20));
        let summary = runner
            .run(&registry, observer, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(summary.blocks, 20);
        assert_eq!(summary.samples, 20_000);
        // 1625 W per phase at unity power factor, scaled by cos(0), cos(30), cos(60).
        let expected = 1625.0 * (1.0 + 30f32.to_radians().cos() + 0.5);
        let active = summary.active_power.unwrap();
        assert!((active - expected).abs() < 0.05 * expected, "P_acc {}", active);
        assert!((summary.mains_frequency.unwrap() - 50.0).abs() < 0.5);
        assert_eq!(summary.statistics_windows, 20);
        assert_eq!(summary.spectra, 19);
        assert!(summary.energy > 0.0);

        let counts = counts.lock().unwrap();
        assert_eq!(counts["P_acc"], 20);
        assert_eq!(counts["f_mains"], 20);
        assert_eq!(counts["E"], 20);
        assert_eq!(counts["U_L1_amplitude"], 19);
        assert!(registry.is_empty(SinkKind::TimeDomain));
    }

    #[test]
    fn runner_flushes_energy_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (_, observer) = counting_observer();
        let config = config(dir.path(), 3);
        let checkpoint_path = config.integration.checkpoint_path.clone();
        let summary = Runner::new(config)
            .run(&registry, observer, &AtomicBool::new(false))
            .unwrap();

        let stored = CheckpointStore::new(checkpoint_path).load().unwrap();
        assert_eq!(stored.cumulative_sum, summary.energy);
    }

    #[test]
    fn raised_stop_flag_ends_unbounded_run() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SinkRegistry::new();
        let (_, observer) = counting_observer();
        let summary = Runner::new(config(dir.path(), 0))
            .run(&registry, observer, &AtomicBool::new(true))
            .unwrap();
        assert_eq!(summary.blocks, 0);
    }

    #[test]
    fn invalid_stage_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 1);
        config.statistics.decimation = 0;
        let (_, observer) = counting_observer();
        let err = Runner::new(config)
            .run(&SinkRegistry::new(), observer, &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("statistics"));
    }
}
