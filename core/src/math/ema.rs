use crate::prelude::{validate_alpha, StageResult};

/// Single-pole IIR smoother `y = alpha * x + (1 - alpha) * y_prev`.
///
/// State is kept in `f64` so that coefficients as small as `1e-7` still move
/// the estimate.
#[derive(Debug, Clone)]
pub struct ExponentialFilter {
    alpha: f64,
    beta: f64,
    value: f64,
}

impl ExponentialFilter {
    pub fn new(alpha: f64) -> StageResult<Self> {
        Self::with_initial(alpha, 0.0)
    }

    pub fn with_initial(alpha: f64, initial: f64) -> StageResult<Self> {
        let alpha = validate_alpha(alpha)?;
        Ok(Self {
            alpha,
            beta: 1.0 - alpha,
            value: initial,
        })
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.value = self.alpha * sample + self.beta * self.value;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_converges_to_constant_input() {
        let mut filter = ExponentialFilter::new(0.01).unwrap();
        for _ in 0..5_000 {
            filter.update(4.0);
        }
        assert!((filter.value() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn first_update_weights_by_alpha() {
        let mut filter = ExponentialFilter::with_initial(0.25, 8.0).unwrap();
        assert_eq!(filter.update(0.0), 6.0);
    }

    #[test]
    fn degenerate_alpha_is_rejected() {
        assert!(ExponentialFilter::new(0.0).is_err());
        assert!(ExponentialFilter::new(1.0).is_err());
        assert!(ExponentialFilter::new(-0.5).is_err());
    }
}
