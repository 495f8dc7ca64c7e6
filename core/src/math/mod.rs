pub mod ema;
pub mod fft;
pub mod noise;
pub mod phase;
pub mod stats;

pub use ema::ExponentialFilter;
pub use fft::FftHelper;
pub use noise::standard_normal;
pub use phase::wrap_phase;
pub use stats::RunningMoments;
