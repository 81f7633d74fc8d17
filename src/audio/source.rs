// Audio source: dedicated capture thread with frame fan-out
//
// Platform streams are not Send on every backend, so the backend lives on
// a dedicated thread and is driven via channels. The same thread assembles
// fixed-duration PCM frames from the sample ring and fans them out to
// subscribers by reference.

use super::level::{log_level_verdict, measure_level};
use super::{
    f32_to_i16_le, AudioFrame, CaptureBackend, CaptureConfig, CaptureError, PreprocessingChain,
    MAX_FRAME_SUBSCRIBERS,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

/// Receiving half of a frame subscription
pub type FrameReceiver = tokio_mpsc::Receiver<Arc<AudioFrame>>;

type FrameSender = tokio_mpsc::Sender<Arc<AudioFrame>>;

/// Capacity of each subscriber channel (two seconds of frames at the
/// default interval); a full channel drops the frame for that subscriber
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 8;

/// How often the capture thread drains the ring and checks for commands
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Commands sent to the capture thread
enum SourceCommand {
    /// Start the backend and begin emitting frames
    Acquire {
        config: CaptureConfig,
        response_tx: Sender<Result<u32, CaptureError>>,
    },
    /// Stop the backend; a no-op when idle
    Release { response_tx: Sender<()> },
    /// Stop and exit the thread
    Shutdown,
}

/// Microphone access with frame fan-out.
///
/// An `AudioSource` persists across listening sessions: `acquire()` opens
/// the device and starts emitting frames, `release()` closes it, and both
/// can be repeated. Subscriptions survive only as long as their receiver;
/// closed subscribers are pruned, freeing their slot.
pub struct AudioSource {
    sender: Sender<SourceCommand>,
    thread: Option<JoinHandle<()>>,
    subscribers: Arc<Mutex<Vec<FrameSender>>>,
    capturing: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl AudioSource {
    /// Spawn the capture thread. The factory runs on that thread, so the
    /// backend it builds never has to cross a thread boundary.
    pub fn new<F>(factory: F) -> Self
    where
        F: FnOnce() -> Box<dyn CaptureBackend> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let subscribers: Arc<Mutex<Vec<FrameSender>>> = Arc::new(Mutex::new(Vec::new()));
        let capturing = Arc::new(AtomicBool::new(false));
        let frames_emitted = Arc::new(AtomicU64::new(0));
        let frames_dropped = Arc::new(AtomicU64::new(0));

        let thread_subs = Arc::clone(&subscribers);
        let thread_capturing = Arc::clone(&capturing);
        let thread_emitted = Arc::clone(&frames_emitted);
        let thread_dropped = Arc::clone(&frames_dropped);
        let thread = thread::spawn(move || {
            source_thread_main(
                receiver,
                factory(),
                thread_subs,
                thread_capturing,
                thread_emitted,
                thread_dropped,
            );
        });

        Self {
            sender,
            thread: Some(thread),
            subscribers,
            capturing,
            frames_emitted,
            frames_dropped,
        }
    }

    /// Register a frame subscriber.
    ///
    /// At most [`MAX_FRAME_SUBSCRIBERS`] receivers may be live at once;
    /// dropping a receiver frees its slot.
    pub fn subscribe(&self) -> Result<FrameReceiver, CaptureError> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| CaptureError::StreamError("subscriber list poisoned".to_string()))?;
        subs.retain(|tx| !tx.is_closed());
        if subs.len() >= MAX_FRAME_SUBSCRIBERS {
            return Err(CaptureError::SubscriberLimit(MAX_FRAME_SUBSCRIBERS));
        }
        let (tx, rx) = tokio_mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        subs.push(tx);
        Ok(rx)
    }

    /// Open the device and start emitting frames.
    ///
    /// Returns the sample rate frames are emitted at. Blocks until the
    /// capture thread has started (or failed to start) the backend.
    #[must_use = "this returns a Result that should be handled"]
    pub fn acquire(&self, config: &CaptureConfig) -> Result<u32, CaptureError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(SourceCommand::Acquire {
                config: config.clone(),
                response_tx,
            })
            .map_err(|_| thread_gone())?;
        response_rx.recv().map_err(|_| thread_gone())?
    }

    /// Close the device. Safe to call at any time, in any state.
    pub fn release(&self) {
        let (response_tx, response_rx) = mpsc::channel();
        if self
            .sender
            .send(SourceCommand::Release { response_tx })
            .is_ok()
        {
            // Wait so the microphone is actually closed when we return
            let _ = response_rx.recv();
        }
    }

    /// Whether the device is currently open
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Total frames emitted across all capture runs
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    /// Frame deliveries skipped because a subscriber channel was full
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AudioSource {
    /// Shut down the capture thread when the source is dropped
    fn drop(&mut self) {
        let _ = self.sender.send(SourceCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("capturing", &self.is_capturing())
            .field("frames_emitted", &self.frames_emitted())
            .finish()
    }
}

fn thread_gone() -> CaptureError {
    CaptureError::DeviceError("audio source thread disconnected".to_string())
}

/// Per-capture-run state on the source thread
struct RunState {
    ring: super::SampleRing,
    fault_rx: Receiver<CaptureError>,
    chain: PreprocessingChain,
    pending: Vec<f32>,
    samples_per_frame: usize,
    /// Raw samples gathered for the one-shot level probe; None once done
    probe: Option<Vec<f32>>,
    probe_window: usize,
    seq: u64,
}

impl RunState {
    fn new(ring: super::SampleRing, config: &CaptureConfig) -> (Self, Sender<CaptureError>) {
        let (fault_tx, fault_rx) = mpsc::channel();
        let mut chain = PreprocessingChain::new(config.sample_rate);
        chain.set_noise_suppression(config.noise_suppression);
        (
            Self {
                ring,
                fault_rx,
                chain,
                pending: Vec::new(),
                samples_per_frame: config.samples_per_frame().max(1),
                probe: Some(Vec::new()),
                probe_window: config.sample_rate as usize,
                seq: 0,
            },
            fault_tx,
        )
    }

    /// Drain the ring, run the probe and filters, emit completed frames
    fn tick(
        &mut self,
        subscribers: &Mutex<Vec<FrameSender>>,
        frames_emitted: &AtomicU64,
        frames_dropped: &AtomicU64,
    ) {
        if let Ok(fault) = self.fault_rx.try_recv() {
            crate::error!("Capture stream fault: {}", fault);
        }

        let mut drained = self.ring.drain_samples();
        if drained.is_empty() {
            return;
        }

        // Probe measures the raw input, before any filtering
        if let Some(probe) = self.probe.as_mut() {
            probe.extend_from_slice(&drained);
            if probe.len() >= self.probe_window {
                log_level_verdict(&measure_level(probe));
                self.probe = None;
            }
        }

        self.chain.process_inplace(&mut drained);
        self.pending.extend_from_slice(&drained);

        while self.pending.len() >= self.samples_per_frame {
            let frame_samples: Vec<f32> = self.pending.drain(..self.samples_per_frame).collect();
            let frame = Arc::new(AudioFrame {
                data: f32_to_i16_le(&frame_samples),
                seq: self.seq,
                timestamp: Utc::now(),
            });
            self.seq = self.seq.wrapping_add(1);

            let mut subs = match subscribers.lock() {
                Ok(subs) => subs,
                Err(_) => return,
            };
            subs.retain(|tx| match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => true,
                Err(tokio_mpsc::error::TrySendError::Full(_)) => {
                    if frames_dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                        crate::warn!("Frame subscriber not keeping up, dropping frames");
                    }
                    true
                }
                // Receiver went away; free the slot
                Err(tokio_mpsc::error::TrySendError::Closed(_)) => false,
            });
            frames_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Main loop for the capture thread
fn source_thread_main(
    receiver: Receiver<SourceCommand>,
    mut backend: Box<dyn CaptureBackend>,
    subscribers: Arc<Mutex<Vec<FrameSender>>>,
    capturing: Arc<AtomicBool>,
    frames_emitted: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
) {
    crate::debug!("Audio source thread started");
    let mut run: Option<RunState> = None;

    loop {
        // Poll with a timeout while capturing so frames keep flowing;
        // block when idle
        let command = if run.is_some() {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => Some(cmd),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        match command {
            Some(SourceCommand::Acquire {
                config,
                response_tx,
            }) => {
                if run.is_some() {
                    let _ = response_tx.send(Err(CaptureError::AlreadyCapturing));
                    continue;
                }
                let ring = super::SampleRing::new();
                let (state, fault_tx) = RunState::new(ring.clone(), &config);
                let result = backend.start(ring, &config, Some(fault_tx));
                match &result {
                    Ok(sample_rate) => {
                        crate::info!("Audio capture started at {} Hz", sample_rate);
                        run = Some(state);
                        capturing.store(true, Ordering::Release);
                    }
                    Err(e) => crate::error!("Audio capture failed to start: {}", e),
                }
                let _ = response_tx.send(result);
            }
            Some(SourceCommand::Release { response_tx }) => {
                if run.take().is_some() {
                    match backend.stop() {
                        Ok(()) => crate::debug!("Audio capture stopped"),
                        Err(e) => crate::error!("Audio capture failed to stop: {}", e),
                    }
                    capturing.store(false, Ordering::Release);
                } else {
                    crate::debug!("Release with no active capture");
                }
                let _ = response_tx.send(());
            }
            Some(SourceCommand::Shutdown) => {
                if run.take().is_some() {
                    let _ = backend.stop();
                    capturing.store(false, Ordering::Release);
                }
                break;
            }
            None => {
                if let Some(state) = run.as_mut() {
                    state.tick(&subscribers, &frames_emitted, &frames_dropped);
                }
            }
        }
    }
    crate::debug!("Audio source thread exiting");
}

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;
