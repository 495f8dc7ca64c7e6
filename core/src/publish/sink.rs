use crate::prelude::{
    ProcessingStage, StageError, StageInput, StageMetadata, StageOutput, StageResult,
};
use crate::publish::registry::{Registration, SinkHandle, SinkId, SinkKind, SinkRegistry};
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::time::{epoch_nanos, SystemClock, TimeSource};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Static description of a sink, visible to whoever enumerates the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkDescriptor {
    pub kind: SinkKind,
    pub signal_names: Vec<String>,
    pub signal_units: Vec<String>,
    pub sample_rate: f32,
    /// Only set for frequency-domain sinks.
    pub bandwidth: Option<f32>,
    /// Values per item; 1 for time-domain sinks.
    pub vector_size: usize,
}

/// One delivery to the observers of a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedResult {
    pub kind: SinkKind,
    pub signal_names: Vec<String>,
    pub signal_units: Vec<String>,
    pub sample_rate: f32,
    pub vector_size: usize,
    /// UTC nanoseconds of the first value in `channels`.
    pub timestamp_ns: i64,
    pub channels: Vec<Vec<f32>>,
}

impl PublishedResult {
    /// Items in this delivery: samples, or whole vectors for frequency sinks.
    pub fn items(&self) -> usize {
        let values = self.channels.first().map(Vec::len).unwrap_or(0);
        values / self.vector_size.max(1)
    }
}

/// Receiver of published results. Calls arrive on the stage's thread.
pub trait ResultObserver: Send + Sync {
    fn on_result(&self, result: &PublishedResult);

    /// A closed observer is detached before the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> ResultObserver for F
where
    F: Fn(&PublishedResult) + Send + Sync,
{
    fn on_result(&self, result: &PublishedResult) {
        self(result)
    }
}

/// Forwards every result into an unbounded tokio channel.
pub struct ChannelObserver {
    sender: UnboundedSender<PublishedResult>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<PublishedResult>) -> Self {
        Self { sender }
    }
}

impl ResultObserver for ChannelObserver {
    fn on_result(&self, result: &PublishedResult) {
        if self.sender.send(result.clone()).is_err() {
            log::debug!("result receiver closed; dropping delivery");
        }
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Terminal stage handing results to the observers attached to it.
///
/// The sink registers itself on construction and stays listed until it is
/// dropped. The first block is stamped with the wall clock; later blocks are
/// stamped by advancing that time by the duration the previous block covered.
pub struct PublishSink {
    handle: Arc<SinkHandle>,
    registration: Registration,
    clock: Box<dyn TimeSource>,
    next_timestamp_ns: Option<i64>,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl PublishSink {
    pub fn time_domain(
        registry: &SinkRegistry,
        signal_names: &[&str],
        signal_units: &[&str],
        sample_rate: f32,
    ) -> StageResult<Self> {
        Self::register(
            registry,
            SinkDescriptor {
                kind: SinkKind::TimeDomain,
                signal_names: to_strings(signal_names),
                signal_units: to_strings(signal_units),
                sample_rate,
                bandwidth: None,
                vector_size: 1,
            },
        )
    }

    pub fn frequency_domain(
        registry: &SinkRegistry,
        signal_names: &[&str],
        signal_units: &[&str],
        sample_rate: f32,
        bandwidth: f32,
        vector_size: usize,
    ) -> StageResult<Self> {
        if vector_size == 0 {
            return Err(StageError::InvalidConfig(
                "frequency sink vector size must be positive".into(),
            ));
        }
        Self::register(
            registry,
            SinkDescriptor {
                kind: SinkKind::FrequencyDomain,
                signal_names: to_strings(signal_names),
                signal_units: to_strings(signal_units),
                sample_rate,
                bandwidth: Some(bandwidth),
                vector_size,
            },
        )
    }

    fn register(registry: &SinkRegistry, descriptor: SinkDescriptor) -> StageResult<Self> {
        if descriptor.signal_names.is_empty() {
            return Err(StageError::InvalidConfig("sink needs at least one signal".into()));
        }
        if descriptor.signal_units.len() != descriptor.signal_names.len() {
            return Err(StageError::InvalidConfig(format!(
                "{} signal names but {} units",
                descriptor.signal_names.len(),
                descriptor.signal_units.len()
            )));
        }
        if !(descriptor.sample_rate.is_finite() && descriptor.sample_rate > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "sink sample rate must be positive, got {}",
                descriptor.sample_rate
            )));
        }
        let (handle, registration) = registry.register(descriptor);
        Ok(Self {
            handle,
            registration,
            clock: Box::new(SystemClock),
            next_timestamp_ns: None,
            logger: LogManager::new("publish"),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn with_clock(mut self, clock: Box<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> SinkId {
        self.registration.id()
    }

    pub fn descriptor(&self) -> &SinkDescriptor {
        self.handle.descriptor()
    }

    pub fn subscribe(&self, observer: Arc<dyn ResultObserver>) {
        self.handle.subscribe(observer);
    }

    pub fn unsubscribe(&self, observer: &Arc<dyn ResultObserver>) -> bool {
        self.handle.unsubscribe(observer)
    }

    /// Delivers one block to every current observer and returns the item count.
    ///
    /// Empty blocks are not delivered and do not advance the timestamp.
    pub fn publish(&mut self, channels: Vec<Vec<f32>>) -> StageResult<usize> {
        let descriptor = self.handle.descriptor();
        if channels.len() != descriptor.signal_names.len() {
            return Err(StageError::InvalidInput(format!(
                "sink expects {} channels, got {}",
                descriptor.signal_names.len(),
                channels.len()
            )));
        }
        let values = channels[0].len();
        if channels.iter().any(|channel| channel.len() != values) {
            return Err(StageError::InvalidInput(
                "sink channels differ in length".into(),
            ));
        }
        if values % descriptor.vector_size != 0 {
            return Err(StageError::InvalidInput(format!(
                "{} values are not a whole number of {}-value vectors",
                values, descriptor.vector_size
            )));
        }
        if values == 0 {
            return Ok(0);
        }

        let first_block = self.next_timestamp_ns.is_none();
        let timestamp_ns = match self.next_timestamp_ns {
            Some(timestamp) => timestamp,
            None => epoch_nanos(self.clock.now()),
        };
        let items = values / descriptor.vector_size;
        let span_ns = (values as f64 * 1e9 / descriptor.sample_rate as f64).round() as i64;
        self.next_timestamp_ns = Some(timestamp_ns.saturating_add(span_ns));

        let result = PublishedResult {
            kind: descriptor.kind,
            signal_names: descriptor.signal_names.clone(),
            signal_units: descriptor.signal_units.clone(),
            sample_rate: descriptor.sample_rate,
            vector_size: descriptor.vector_size,
            timestamp_ns,
            channels,
        };
        let observers = self.handle.observers();
        if first_block && observers.is_empty() {
            self.logger.record(&format!(
                "sink {} has no observers yet; results are dropped",
                self.id().value()
            ));
        }
        for observer in &observers {
            observer.on_result(&result);
        }
        self.metrics.record_block(values);
        Ok(items)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}

impl ProcessingStage for PublishSink {
    fn name(&self) -> &'static str {
        "publish"
    }

    fn execute(&mut self, input: StageInput) -> StageResult<StageOutput> {
        let channels = input.blocks.into_iter().map(|block| block.samples).collect();
        let items = self.publish(channels)?;

        let descriptor = self.handle.descriptor();
        let mut metadata = StageMetadata {
            sample_rate: descriptor.sample_rate,
            timestamp_ns: self.next_timestamp_ns,
            ..Default::default()
        };
        metadata.notes.push(format!("published {} items", items));
        Ok(StageOutput {
            channels: Vec::new(),
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.next_timestamp_ns = None;
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
