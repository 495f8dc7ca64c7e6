use std::sync::Mutex;

/// Counters a stage keeps about its own health.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub blocks: usize,
    pub samples: usize,
    pub faults: usize,
    pub persistence_failures: usize,
}

#[derive(Default)]
struct Metrics {
    blocks: usize,
    samples: usize,
    faults: usize,
    persistence_failures: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_block(&self, samples: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.blocks += 1;
            metrics.samples += samples;
        }
    }

    pub fn record_fault(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.faults += 1;
        }
    }

    pub fn record_persistence_failure(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.persistence_failures += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            MetricsSnapshot {
                blocks: metrics.blocks,
                samples: metrics.samples,
                faults: metrics.faults,
                persistence_failures: metrics.persistence_failures,
            }
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
