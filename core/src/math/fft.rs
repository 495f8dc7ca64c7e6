use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Forward FFT of a fixed size, reusing its buffers between calls.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::zero(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            buffer: vec![Complex32::zero(); size],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Single-sided amplitude spectrum with `size / 2` bins.
    ///
    /// Shorter inputs are zero-padded, longer ones truncated.
    pub fn amplitude_spectrum(&mut self, input: &[f32]) -> Vec<f32> {
        let size = self.buffer.len();
        for (slot, value) in self
            .buffer
            .iter_mut()
            .zip(input.iter().copied().chain(std::iter::repeat(0.0)))
        {
            *slot = Complex32::new(value, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / size as f32;
        self.buffer[..size / 2]
            .iter()
            .enumerate()
            .map(|(bin, value)| {
                let magnitude = value.norm() * scale;
                if bin == 0 {
                    magnitude
                } else {
                    2.0 * magnitude
                }
            })
            .collect()
    }
}
