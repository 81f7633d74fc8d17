// cpal-based audio capture backend
// This code interacts with hardware and is excluded from coverage measurement
//
// Note: All impl blocks here are excluded from coverage because they
// interact with hardware and cannot be unit tested.
#![cfg_attr(coverage_nightly, coverage(off))]

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use rubato::{FftFixedIn, Resampler};

use super::{
    CaptureBackend, CaptureConfig, CaptureError, CaptureState, SampleRing,
    MAX_RESAMPLE_BUFFER_SAMPLES,
};
use crate::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

/// Chunk size for real-time resampling (~64ms at 16kHz)
const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Audio capture backend using cpal for platform-specific audio capture
pub struct CpalBackend {
    state: CaptureState,
    stream: Option<Stream>,
}

impl CpalBackend {
    /// Create a new cpal backend
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            stream: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Find an audio input device by name
///
/// Searches through all input devices and returns the one matching the given name.
/// Returns None if no device with that name is found.
fn find_device_by_name(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.input_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

/// Try to find a supported config with the target sample rate
fn find_config_with_sample_rate(
    device: &cpal::Device,
    target_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    if let Ok(configs) = device.supported_input_configs() {
        for config_range in configs {
            let min_rate = config_range.min_sample_rate().0;
            let max_rate = config_range.max_sample_rate().0;
            if min_rate <= target_rate && target_rate <= max_rate {
                return Some(config_range.with_sample_rate(SampleRate(target_rate)));
            }
        }
    }
    None
}

/// Create a resampler for converting from source rate to target rate
fn create_resampler(
    source_rate: u32,
    target_rate: u32,
    chunk_size: usize,
) -> Result<FftFixedIn<f32>, CaptureError> {
    FftFixedIn::new(
        source_rate as usize,
        target_rate as usize,
        chunk_size,
        1, // sub_chunks
        1, // channels - mono after downmix
    )
    .map_err(|e| CaptureError::DeviceError(format!("Failed to create resampler: {}", e)))
}

/// Shared state for audio processing callbacks.
///
/// All sample-format callbacks convert to mono f32 and delegate here.
struct CallbackState {
    ring: SampleRing,
    channels: usize,
    resampler: Option<Arc<Mutex<FftFixedIn<f32>>>>,
    resample_buffer: Arc<Mutex<Vec<f32>>>,
    chunk_buffer: Arc<Mutex<Vec<f32>>>,
    chunk_size: usize,
    overflow_logged: AtomicBool,
    ring_full_logged: AtomicBool,
}

impl CallbackState {
    /// Process f32 audio samples: downmix, resample, push into the ring
    fn process_samples(&self, f32_samples: &[f32]) {
        let mono: Vec<f32> = if self.channels > 1 {
            f32_samples
                .chunks_exact(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
                .collect()
        } else {
            f32_samples.to_vec()
        };

        let samples_to_add = if let Some(ref resampler) = self.resampler {
            // Accumulate samples and resample when we have enough
            let mut resample_buf = match self.resample_buffer.lock() {
                Ok(buf) => buf,
                Err(_) => return,
            };

            // Streaming can tolerate a dropped block; blocking the audio
            // callback cannot. Drop and log once if resampling falls behind.
            if resample_buf.len() + mono.len() > MAX_RESAMPLE_BUFFER_SAMPLES {
                if !self.overflow_logged.swap(true, Ordering::SeqCst) {
                    error!("Resample buffer overflow: resampling can't keep up, dropping audio");
                }
                return;
            }
            resample_buf.extend_from_slice(&mono);

            // Process full chunks using the pre-allocated buffer
            let mut resampled = Vec::new();
            while resample_buf.len() >= self.chunk_size {
                if let Ok(mut chunk_buf) = self.chunk_buffer.lock() {
                    chunk_buf.copy_from_slice(&resample_buf[..self.chunk_size]);
                    resample_buf.drain(..self.chunk_size);
                    if let Ok(mut r) = resampler.lock() {
                        if let Ok(output) = r.process(&[chunk_buf.as_slice()], None) {
                            if !output.is_empty() {
                                resampled.extend_from_slice(&output[0]);
                            }
                        }
                    }
                } else {
                    // Fallback to allocation if chunk buffer lock fails
                    let chunk: Vec<f32> = resample_buf.drain(..self.chunk_size).collect();
                    if let Ok(mut r) = resampler.lock() {
                        if let Ok(output) = r.process(&[chunk], None) {
                            if !output.is_empty() {
                                resampled.extend_from_slice(&output[0]);
                            }
                        }
                    }
                }
            }
            resampled
        } else {
            mono
        };

        // Push to the ring (lock-free); a short write means the frame
        // thread stalled and the remainder is dropped
        let pushed = self.ring.push_samples(&samples_to_add);
        if pushed < samples_to_add.len() && !self.ring_full_logged.swap(true, Ordering::SeqCst) {
            warn!(
                "Capture ring full, dropped {} samples",
                samples_to_add.len() - pushed
            );
        }
    }
}

impl CaptureBackend for CpalBackend {
    fn start(
        &mut self,
        ring: SampleRing,
        config: &CaptureConfig,
        fault: Option<Sender<CaptureError>>,
    ) -> Result<u32, CaptureError> {
        if self.state == CaptureState::Capturing {
            return Err(CaptureError::AlreadyCapturing);
        }
        let target_rate = config.sample_rate;
        info!("Starting audio capture (target: {}Hz)...", target_rate);

        if config.echo_cancellation {
            // cpal exposes no AEC control; surface the gap rather than
            // silently claiming the constraint was honored
            debug!("Echo cancellation requested but not supported by this backend");
        }

        // Get the default audio host
        let host = cpal::default_host();
        debug!("Host: {:?}", host.id());

        // Find the requested device or fall back to default
        let device = if let Some(ref name) = config.device_name {
            match find_device_by_name(name) {
                Some(d) => {
                    info!("Using requested device: {}", name);
                    d
                }
                None => {
                    warn!(
                        "Requested device '{}' not found, falling back to default",
                        name
                    );
                    host.default_input_device().ok_or_else(|| {
                        error!("No input device available!");
                        CaptureError::NoDeviceAvailable
                    })?
                }
            }
        } else {
            host.default_input_device().ok_or_else(|| {
                error!("No input device available!");
                CaptureError::NoDeviceAvailable
            })?
        };
        debug!(
            "Input device: {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        // Try to get a config at the target rate, fall back to default
        let (device_config, needs_resampling) =
            if let Some(native) = find_config_with_sample_rate(&device, target_rate) {
                info!("Device supports {}Hz natively", target_rate);
                (native, false)
            } else {
                let default_config = device.default_input_config().map_err(|e| {
                    error!("Failed to get input config: {}", e);
                    CaptureError::DeviceError(e.to_string())
                })?;
                warn!(
                    "Device doesn't support {}Hz, will resample from {}Hz",
                    target_rate,
                    default_config.sample_rate().0
                );
                (default_config, true)
            };

        let device_sample_rate = device_config.sample_rate().0;
        let device_channels = device_config.channels() as usize;
        debug!(
            "Config: {} Hz, {:?}, {} channels",
            device_sample_rate,
            device_config.sample_format(),
            device_channels
        );

        // Create resampler if needed
        let resampler: Option<Arc<Mutex<FftFixedIn<f32>>>> = if needs_resampling {
            let r = create_resampler(device_sample_rate, target_rate, RESAMPLE_CHUNK_SIZE)?;
            Some(Arc::new(Mutex::new(r)))
        } else {
            None
        };

        // Report a stream fault at most once
        let err_fault = fault;
        let err_faulted = Arc::new(AtomicBool::new(false));
        let err_fn = move |err: cpal::StreamError| {
            error!("Audio stream error: {}", err);
            if !err_faulted.swap(true, Ordering::SeqCst) {
                if let Some(ref sender) = err_fault {
                    let _ = sender.send(CaptureError::StreamError(err.to_string()));
                }
            }
        };

        let callback_state = Arc::new(CallbackState {
            ring,
            channels: device_channels,
            resampler,
            resample_buffer: Arc::new(Mutex::new(Vec::new())),
            chunk_buffer: Arc::new(Mutex::new(vec![0.0f32; RESAMPLE_CHUNK_SIZE])),
            chunk_size: RESAMPLE_CHUNK_SIZE,
            overflow_logged: AtomicBool::new(false),
            ring_full_logged: AtomicBool::new(false),
        });

        // Build the input stream based on sample format
        // Each callback converts to f32 and delegates to CallbackState::process_samples
        let stream = match device_config.sample_format() {
            cpal::SampleFormat::F32 => {
                let state = callback_state.clone();
                device.build_input_stream(
                    &device_config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        state.process_samples(data);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let state = callback_state.clone();
                device.build_input_stream(
                    &device_config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        // Convert i16 samples to f32 normalized to [-1.0, 1.0]
                        let f32_samples: Vec<f32> =
                            data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                        state.process_samples(&f32_samples);
                    },
                    err_fn,
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let state = callback_state.clone();
                device.build_input_stream(
                    &device_config.into(),
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        // Convert u16 samples to f32 normalized to [-1.0, 1.0]
                        let f32_samples: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                            .collect();
                        state.process_samples(&f32_samples);
                    },
                    err_fn,
                    None,
                )
            }
            _ => {
                return Err(CaptureError::DeviceError(
                    "Unsupported sample format".to_string(),
                ))
            }
        }
        .map_err(|e| {
            error!("Failed to build input stream: {}", e);
            CaptureError::StreamError(e.to_string())
        })?;

        // Start the stream
        stream.play().map_err(|e| {
            error!("Failed to start stream: {}", e);
            CaptureError::StreamError(e.to_string())
        })?;

        info!(
            "Audio stream started at {}Hz (output: {}Hz)",
            device_sample_rate, target_rate
        );
        self.stream = Some(stream);
        self.state = CaptureState::Capturing;
        // The ring always receives samples at the target rate
        Ok(target_rate)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        debug!("Stopping audio capture...");
        if let Some(stream) = self.stream.take() {
            // Stream is dropped here, stopping capture
            drop(stream);
            debug!("Audio stream stopped");
        } else {
            debug!("No active stream to stop");
        }
        self.state = CaptureState::Idle;
        Ok(())
    }
}
