use log::{error, info, warn};

/// Per-stage logging handle; every line carries the stage name.
#[derive(Debug, Clone)]
pub struct LogManager {
    stage: &'static str,
}

impl LogManager {
    pub fn new(stage: &'static str) -> Self {
        Self { stage }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.stage, message);
    }

    /// Transient, recoverable condition such as a failed checkpoint write.
    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.stage, message);
    }

    /// Operator-visible fault; processing continues with the best estimate.
    pub fn fault(&self, message: &str) {
        error!("[{}] {}", self.stage, message);
    }
}
