//! Noise-suppression filtering for captured audio.
//!
//! A single highpass stage removes low-frequency rumble (HVAC, traffic,
//! handling noise) before frames are encoded. No spectral shaping beyond
//! that: the downstream transcription service expects natural speech
//! spectra, so anything like pre-emphasis would hurt accuracy.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

/// Cutoff frequency for the rumble filter (Hz).
///
/// Voice fundamentals start around 85Hz; energy below 80Hz is almost
/// always environmental.
pub const HIGHPASS_CUTOFF_HZ: f32 = 80.0;

/// Highpass filter for removing low-frequency rumble.
///
/// Uses a 2nd-order Butterworth IIR filter for smooth frequency response.
/// Stateful between calls; reset it when a new capture run begins.
pub struct HighpassFilter {
    filter: DirectForm2Transposed<f32>,
    enabled: bool,
}

impl HighpassFilter {
    /// Create a new highpass filter at the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        Self::with_cutoff(sample_rate, HIGHPASS_CUTOFF_HZ)
    }

    /// Create a new highpass filter with a custom cutoff frequency.
    pub fn with_cutoff(sample_rate: u32, cutoff_hz: f32) -> Self {
        let coeffs = Coefficients::<f32>::from_params(
            Type::HighPass,
            sample_rate.hz(),
            cutoff_hz.hz(),
            Q_BUTTERWORTH_F32,
        )
        .expect("Failed to create highpass filter coefficients");

        Self {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
            enabled: true,
        }
    }

    /// Enable or disable the filter.
    ///
    /// When disabled, processing returns the input unchanged.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Check if the filter is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reset the filter state.
    ///
    /// Call this between capture runs to prevent state carryover.
    pub fn reset(&mut self) {
        self.filter.reset_state();
    }

    /// Process a buffer of samples through the highpass filter.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if !self.enabled {
            return samples.to_vec();
        }

        samples.iter().map(|&s| self.filter.run(s)).collect()
    }

    /// Process samples in-place, avoiding allocation in the frame path.
    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        for sample in samples.iter_mut() {
            *sample = self.filter.run(*sample);
        }
    }
}

/// Preprocessing applied between the capture ring and frame encoding.
///
/// Currently a single noise-suppression stage; the chain is the place
/// where per-session enablement lives.
pub struct PreprocessingChain {
    highpass: HighpassFilter,
}

impl PreprocessingChain {
    /// Create a new preprocessing chain at the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            highpass: HighpassFilter::new(sample_rate),
        }
    }

    /// Enable or disable noise suppression.
    pub fn set_noise_suppression(&mut self, enabled: bool) {
        self.highpass.set_enabled(enabled);
    }

    /// Whether noise suppression is currently enabled.
    pub fn noise_suppression_enabled(&self) -> bool {
        self.highpass.is_enabled()
    }

    /// Reset all filter states. Call this between capture runs.
    pub fn reset(&mut self) {
        self.highpass.reset();
    }

    /// Process samples in-place through the chain.
    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        self.highpass.process_inplace(samples);
    }
}
