//! Microphone level probe.
//!
//! Shortly after capture starts, the first second of audio is measured and
//! the verdict logged so a dead or badly-placed microphone is visible in
//! the logs instead of manifesting as an eternally silent transcript.

/// Threshold for "too quiet" (-30dBFS RMS, about 0.0316 linear)
pub const QUIET_THRESHOLD_RMS: f32 = 0.0316;

/// Threshold below which the input is considered dead (-47dBFS RMS)
pub const SILENT_THRESHOLD_RMS: f32 = 0.0045;

/// How the measured input level is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelVerdict {
    /// No meaningful signal; the microphone is likely muted or not working
    Silent,
    /// Signal present but weak; transcription quality may suffer
    Quiet,
    /// Healthy input level
    Good,
}

/// Peak and RMS levels over a window of samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelReport {
    /// Maximum absolute sample value
    pub peak: f32,
    /// Root mean square level
    pub rms: f32,
    /// Number of samples analyzed
    pub sample_count: usize,
}

impl LevelReport {
    /// Convert RMS to dBFS
    pub fn rms_dbfs(&self) -> f32 {
        if self.rms <= 0.0 {
            f32::NEG_INFINITY
        } else {
            20.0 * self.rms.log10()
        }
    }

    /// Judge the level against the silence and quiet thresholds
    pub fn verdict(&self) -> LevelVerdict {
        if self.sample_count == 0 || self.rms < SILENT_THRESHOLD_RMS {
            LevelVerdict::Silent
        } else if self.rms < QUIET_THRESHOLD_RMS {
            LevelVerdict::Quiet
        } else {
            LevelVerdict::Good
        }
    }
}

/// Measure peak and RMS over a window of samples
pub fn measure_level(samples: &[f32]) -> LevelReport {
    if samples.is_empty() {
        return LevelReport::default();
    }

    let mut peak: f32 = 0.0;
    let mut sum_sq: f32 = 0.0;
    for &sample in samples {
        let abs_sample = sample.abs();
        if abs_sample > peak {
            peak = abs_sample;
        }
        sum_sq += sample * sample;
    }

    LevelReport {
        peak,
        rms: (sum_sq / samples.len() as f32).sqrt(),
        sample_count: samples.len(),
    }
}

/// Log the verdict for a probe window
pub fn log_level_verdict(report: &LevelReport) {
    match report.verdict() {
        LevelVerdict::Silent => crate::warn!(
            "Microphone probe: no signal detected (rms {:.1} dBFS), check input device",
            report.rms_dbfs()
        ),
        LevelVerdict::Quiet => crate::warn!(
            "Microphone probe: input is quiet (rms {:.1} dBFS), transcription may suffer",
            report.rms_dbfs()
        ),
        LevelVerdict::Good => crate::info!(
            "Microphone probe: levels look good (peak {:.2}, rms {:.1} dBFS)",
            report.peak,
            report.rms_dbfs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_is_silent() {
        let report = measure_level(&[]);
        assert_eq!(report.sample_count, 0);
        assert_eq!(report.verdict(), LevelVerdict::Silent);
    }

    #[test]
    fn test_near_zero_signal_is_silent() {
        let samples = vec![0.001; 1600];
        let report = measure_level(&samples);
        assert_eq!(report.verdict(), LevelVerdict::Silent);
    }

    #[test]
    fn test_weak_signal_is_quiet() {
        // Constant 0.01 has RMS 0.01: above silent, below quiet threshold
        let samples = vec![0.01; 1600];
        let report = measure_level(&samples);
        assert_eq!(report.verdict(), LevelVerdict::Quiet);
    }

    #[test]
    fn test_healthy_signal_is_good() {
        let samples: Vec<f32> = (0..1600)
            .map(|i| 0.5 * (i as f32 * 0.1).sin())
            .collect();
        let report = measure_level(&samples);
        assert_eq!(report.verdict(), LevelVerdict::Good);
        assert!(report.peak <= 0.5);
        assert!(report.rms > QUIET_THRESHOLD_RMS);
    }

    #[test]
    fn test_peak_tracks_largest_magnitude() {
        let report = measure_level(&[0.1, -0.8, 0.3]);
        assert!((report.peak - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rms_dbfs() {
        let report = measure_level(&[1.0; 100]);
        // Full-scale constant signal is 0 dBFS
        assert!(report.rms_dbfs().abs() < 0.01);

        let silent = LevelReport::default();
        assert_eq!(silent.rms_dbfs(), f32::NEG_INFINITY);
    }
}
