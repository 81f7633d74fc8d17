// Audio capture module for microphone input

use chrono::{DateTime, Utc};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod cpal_backend;
pub use cpal_backend::CpalBackend;

pub mod level;
pub use level::{measure_level, LevelReport, LevelVerdict};

pub mod preprocessing;
pub use preprocessing::PreprocessingChain;

mod source;
pub use source::{AudioSource, FrameReceiver};


/// Target sample rate for capture (16 kHz, what streaming STT services expect)
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Ring capacity in samples (~2 seconds at 16kHz).
/// The frame thread drains every frame interval, so this is generous headroom;
/// a full ring means the consumer stalled and we drop rather than block the
/// audio callback.
pub const RING_CAPACITY_SAMPLES: usize = 16000 * 2;

/// Maximum resampling buffer size in samples (~3 seconds at 48kHz)
/// This limits memory growth if resampling can't keep up with input rate.
pub const MAX_RESAMPLE_BUFFER_SAMPLES: usize = 48000 * 3;

/// Maximum number of concurrent frame subscribers
pub const MAX_FRAME_SUBSCRIBERS: usize = 2;

/// One encoded audio frame emitted by the capture pipeline.
///
/// Frames are shared by reference with every subscriber; the payload is
/// little-endian 16-bit PCM at the configured sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw PCM bytes (16-bit little-endian, mono)
    pub data: Vec<u8>,
    /// Monotonic frame counter within the capture run
    pub seq: u64,
    /// When the frame was assembled
    pub timestamp: DateTime<Utc>,
}

/// Microphone capture settings
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Requested channel count (capture is downmixed to mono regardless)
    pub channels: u16,
    /// Sample rate the pipeline emits frames at
    pub sample_rate: u32,
    /// Request acoustic echo cancellation from the device
    pub echo_cancellation: bool,
    /// Run the noise-suppression filter on captured samples
    pub noise_suppression: bool,
    /// How much audio each emitted frame carries
    pub frame_interval: Duration,
    /// Specific input device name; None uses the system default
    pub device_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
            frame_interval: Duration::from_millis(250),
            device_name: None,
        }
    }
}

impl CaptureConfig {
    /// Samples per emitted frame at the configured rate
    pub fn samples_per_frame(&self) -> usize {
        let millis = self.frame_interval.as_millis() as usize;
        (self.sample_rate as usize).saturating_mul(millis) / 1000
    }
}

/// Thread-safe buffer shared between the audio callback and the frame thread
///
/// Uses a SPSC ring buffer for low-contention capture:
/// - Producer (audio callback) writes via `push_samples()` - lock-free
/// - Consumer (frame thread) reads via `drain_samples()` - lock-free
pub struct SampleRing {
    /// Ring buffer producer for lock-free writes
    producer: Arc<Mutex<RingProducer>>,
    /// Ring buffer consumer for lock-free reads
    consumer: Arc<Mutex<RingConsumer>>,
}

impl SampleRing {
    /// Create a new empty ring with default capacity
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY_SAMPLES)
    }

    /// Create a new ring with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();
        Self {
            producer: Arc::new(Mutex::new(producer)),
            consumer: Arc::new(Mutex::new(consumer)),
        }
    }

    /// Push samples to the ring (used by audio callback)
    ///
    /// Returns the number of samples actually written. A short write means
    /// the ring is full and the remainder was dropped.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        match self.producer.lock() {
            Ok(mut prod) => prod.push_slice(samples),
            Err(_) => 0,
        }
    }

    /// Drain every available sample out of the ring
    pub fn drain_samples(&self) -> Vec<f32> {
        let mut drained = Vec::new();
        if let Ok(mut cons) = self.consumer.lock() {
            let available = cons.occupied_len();
            if available > 0 {
                drained.resize(available, 0.0);
                cons.pop_slice(&mut drained);
            }
        }
        drained
    }

    /// Number of samples waiting to be drained
    pub fn occupied_len(&self) -> usize {
        self.consumer.lock().map(|c| c.occupied_len()).unwrap_or(0)
    }
}

impl Default for SampleRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SampleRing {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            consumer: Arc::clone(&self.consumer),
        }
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("occupied_len", &self.occupied_len())
            .finish()
    }
}

/// Type alias for ring buffer producer half
type RingProducer = ringbuf::HeapProd<f32>;

/// Type alias for ring buffer consumer half
type RingConsumer = ringbuf::HeapCons<f32>;

/// State of the audio capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not capturing audio
    Idle,
    /// Actively capturing audio
    Capturing,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Errors that can occur during audio capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// No audio input device is available
    NoDeviceAvailable,
    /// Error with the audio device
    DeviceError(String),
    /// Error with the audio stream
    StreamError(String),
    /// Subscriber limit reached; the pipeline fans out to at most
    /// `MAX_FRAME_SUBSCRIBERS` receivers
    SubscriberLimit(usize),
    /// Capture is already running
    AlreadyCapturing,
}

impl CaptureError {
    /// Stable machine-readable code for error payloads
    pub fn reason_code(&self) -> &'static str {
        match self {
            CaptureError::NoDeviceAvailable => "no_device",
            CaptureError::DeviceError(_) => "device_error",
            CaptureError::StreamError(_) => "stream_error",
            CaptureError::SubscriberLimit(_) => "subscriber_limit",
            CaptureError::AlreadyCapturing => "already_capturing",
        }
    }
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoDeviceAvailable => write!(f, "No audio input device available"),
            CaptureError::DeviceError(msg) => write!(f, "Audio device error: {}", msg),
            CaptureError::StreamError(msg) => write!(f, "Audio stream error: {}", msg),
            CaptureError::SubscriberLimit(max) => {
                write!(f, "Audio frame subscriber limit of {} reached", max)
            }
            CaptureError::AlreadyCapturing => write!(f, "Audio capture is already running"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Trait for audio capture backends (allows mocking in tests)
///
/// A backend owns the platform stream and feeds raw mono samples at the
/// configured sample rate into the provided ring. Frame assembly, filtering
/// and fan-out happen downstream in [`AudioSource`]. Backends are created
/// and driven entirely on the source's dedicated thread, so they need not
/// be `Send`.
pub trait CaptureBackend {
    /// Start capturing into the provided ring.
    ///
    /// Returns the rate of the samples being pushed (always the configured
    /// rate; backends resample internally when the device differs). The
    /// optional `fault` sender reports mid-stream errors such as device
    /// disconnection.
    fn start(
        &mut self,
        ring: SampleRing,
        config: &CaptureConfig,
        fault: Option<std::sync::mpsc::Sender<CaptureError>>,
    ) -> Result<u32, CaptureError>;

    /// Stop capturing audio
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Convert f32 samples in [-1.0, 1.0] to packed little-endian 16-bit PCM
pub fn f32_to_i16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Reinterpret packed little-endian 16-bit PCM bytes as samples
///
/// A trailing odd byte is ignored.
pub fn i16_le_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
