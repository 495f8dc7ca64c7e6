/// One-pass mean/variance accumulator using the Youngs–Cramer update.
///
/// The running sum `T` and the sum of squared deviations `S` are updated with
/// each sample's ordinal `j`:
/// `T_j = T_{j-1} + x_j`, `S_j = S_{j-1} + (j * x_j - T_j)^2 / (j * (j - 1))`.
/// Min and max are tracked alongside.
#[derive(Debug, Clone, Copy)]
pub struct RunningMoments {
    count: u64,
    sum: f64,
    sum_sq_dev: f64,
    min: f64,
    max: f64,
}

impl RunningMoments {
    pub const fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq_dev: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        self.sum += sample;
        if self.count > 1 {
            let j = self.count as f64;
            let diff = j * sample - self.sum;
            self.sum_sq_dev += diff * diff / (j * (j - 1.0));
        }
        if sample < self.min {
            self.min = sample;
        }
        if sample > self.max {
            self.max = sample;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Population standard deviation `sqrt(S / N)`.
    pub fn std_deviation(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq_dev / self.count as f64).max(0.0).sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for RunningMoments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moments_of(samples: &[f64]) -> RunningMoments {
        let mut moments = RunningMoments::new();
        for &sample in samples {
            moments.push(sample);
        }
        moments
    }

    #[test]
    fn empty_accumulator_yields_zero() {
        let moments = RunningMoments::new();
        assert_eq!(moments.mean(), 0.0);
        assert_eq!(moments.std_deviation(), 0.0);
    }

    #[test]
    fn three_samples_match_population_deviation() {
        let moments = moments_of(&[1.0, 3.0, 2.0]);
        assert!((moments.mean() - 2.0).abs() < 1e-12);
        assert!((moments.std_deviation() - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(moments.min(), 1.0);
        assert_eq!(moments.max(), 3.0);
    }

    #[test]
    fn large_offset_does_not_cancel() {
        // Naive E[x^2] - E[x]^2 loses every significant digit at this offset.
        let offset = 1.0e9;
        let moments = moments_of(&[offset + 4.0, offset + 7.0, offset + 13.0, offset + 16.0]);
        assert!((moments.mean() - (offset + 10.0)).abs() < 1e-6);
        assert!((moments.std_deviation() - 22.5f64.sqrt()).abs() < 1e-6);
    }
}
