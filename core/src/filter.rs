use crate::error::{Result, SqLinkError};
use std::f32::consts::PI;

/// Linear-phase FIR low-pass (Hamming-windowed sinc, unity DC gain).
///
/// Filtering is valid-mode: the output is `taps - 1` samples shorter than the
/// input and sample `i` of the output is centred on input sample
/// `i + (taps - 1) / 2`.
pub struct LowPassFilter {
    taps: Vec<f32>,
}

impl LowPassFilter {
    pub fn new(num_taps: usize, cutoff_hz: f32, sample_rate: f32) -> Result<Self> {
        if num_taps == 0 || num_taps % 2 == 0 {
            return Err(SqLinkError::InvalidConfig(format!(
                "FIR length must be odd, got {}",
                num_taps
            )));
        }
        if cutoff_hz <= 0.0 || cutoff_hz >= sample_rate / 2.0 {
            return Err(SqLinkError::InvalidConfig(format!(
                "Cutoff {} Hz outside (0, {})",
                cutoff_hz,
                sample_rate / 2.0
            )));
        }

        let fc = cutoff_hz / sample_rate;
        let centre = (num_taps / 2) as f32;
        let mut taps: Vec<f32> = (0..num_taps)
            .map(|i| {
                let n = i as f32 - centre;
                let sinc = if n == 0.0 {
                    2.0 * fc
                } else {
                    (2.0 * PI * fc * n).sin() / (PI * n)
                };
                let window = 0.54 - 0.46 * (2.0 * PI * i as f32 / (num_taps - 1) as f32).cos();
                sinc * window
            })
            .collect();

        let gain: f32 = taps.iter().sum();
        for tap in taps.iter_mut() {
            *tap /= gain;
        }

        Ok(Self { taps })
    }

    pub fn num_taps(&self) -> usize {
        self.taps.len()
    }

    /// Samples the output loses relative to the input
    pub fn delay(&self) -> usize {
        self.taps.len() - 1
    }

    /// Filter `input` into `output` (cleared first).
    pub fn apply(&self, input: &[f32], output: &mut Vec<f32>) -> Result<()> {
        let n = self.taps.len();
        if input.len() < n {
            return Err(SqLinkError::InsufficientSamples {
                needed: n,
                got: input.len(),
            });
        }

        output.clear();
        output.extend(
            input
                .windows(n)
                .map(|w| w.iter().zip(self.taps.iter()).map(|(x, h)| x * h).sum::<f32>()),
        );
        Ok(())
    }
}
