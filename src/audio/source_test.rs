use super::*;
use crate::audio::{i16_le_to_samples, SampleRing};
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

/// Backend that records calls and hands the ring to the test
struct FakeBackend {
    ring: Arc<Mutex<Option<SampleRing>>>,
    started: Arc<AtomicBool>,
    stop_count: Arc<AtomicUsize>,
    fail_start: bool,
}

impl CaptureBackend for FakeBackend {
    fn start(
        &mut self,
        ring: SampleRing,
        config: &CaptureConfig,
        _fault: Option<Sender<CaptureError>>,
    ) -> Result<u32, CaptureError> {
        if self.fail_start {
            return Err(CaptureError::NoDeviceAvailable);
        }
        *self.ring.lock().unwrap() = Some(ring);
        self.started.store(true, Ordering::SeqCst);
        Ok(config.sample_rate)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.started.store(false, Ordering::SeqCst);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    source: AudioSource,
    ring: Arc<Mutex<Option<SampleRing>>>,
    started: Arc<AtomicBool>,
    stop_count: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let ring = Arc::new(Mutex::new(None));
    let started = Arc::new(AtomicBool::new(false));
    let stop_count = Arc::new(AtomicUsize::new(0));

    let backend_ring = Arc::clone(&ring);
    let backend_started = Arc::clone(&started);
    let backend_stops = Arc::clone(&stop_count);
    let source = AudioSource::new(move || {
        Box::new(FakeBackend {
            ring: backend_ring,
            started: backend_started,
            stop_count: backend_stops,
            fail_start: false,
        })
    });

    Fixture {
        source,
        ring,
        started,
        stop_count,
    }
}

/// Small frames at a low rate so tests run fast
fn fast_config() -> CaptureConfig {
    CaptureConfig {
        sample_rate: 8000,
        frame_interval: Duration::from_millis(100),
        noise_suppression: false,
        ..CaptureConfig::default()
    }
}

fn push_samples(ring: &Arc<Mutex<Option<SampleRing>>>, samples: &[f32]) {
    let guard = ring.lock().unwrap();
    let ring = guard.as_ref().expect("backend not started");
    assert_eq!(ring.push_samples(samples), samples.len());
}

async fn recv_frame(rx: &mut FrameReceiver) -> Arc<AudioFrame> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("frame channel closed")
}

#[test]
fn test_acquire_starts_backend() {
    let fx = fixture();
    assert!(!fx.source.is_capturing());

    let rate = fx.source.acquire(&fast_config()).unwrap();
    assert_eq!(rate, 8000);
    assert!(fx.started.load(Ordering::SeqCst));
    assert!(fx.source.is_capturing());
}

#[test]
fn test_acquire_while_capturing_fails() {
    let fx = fixture();
    fx.source.acquire(&fast_config()).unwrap();

    let err = fx.source.acquire(&fast_config()).unwrap_err();
    assert_eq!(err, CaptureError::AlreadyCapturing);
    // The original run is untouched
    assert!(fx.source.is_capturing());
}

#[test]
fn test_release_is_idempotent() {
    let fx = fixture();

    // Release before any acquire is a no-op
    fx.source.release();
    fx.source.release();
    assert_eq!(fx.stop_count.load(Ordering::SeqCst), 0);

    fx.source.acquire(&fast_config()).unwrap();
    fx.source.release();
    fx.source.release();
    assert_eq!(fx.stop_count.load(Ordering::SeqCst), 1);
    assert!(!fx.source.is_capturing());
}

#[test]
fn test_acquire_after_release_restarts() {
    let fx = fixture();
    fx.source.acquire(&fast_config()).unwrap();
    fx.source.release();

    fx.source.acquire(&fast_config()).unwrap();
    assert!(fx.source.is_capturing());
    assert_eq!(fx.stop_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_start_failure_reported() {
    let source = AudioSource::new(|| {
        Box::new(FakeBackend {
            ring: Arc::new(Mutex::new(None)),
            started: Arc::new(AtomicBool::new(false)),
            stop_count: Arc::new(AtomicUsize::new(0)),
            fail_start: true,
        })
    });

    let err = source.acquire(&fast_config()).unwrap_err();
    assert_eq!(err, CaptureError::NoDeviceAvailable);
    assert!(!source.is_capturing());
}

#[test]
fn test_subscriber_limit() {
    let fx = fixture();
    let _rx1 = fx.source.subscribe().unwrap();
    let _rx2 = fx.source.subscribe().unwrap();

    let err = fx.source.subscribe().unwrap_err();
    assert_eq!(err, CaptureError::SubscriberLimit(MAX_FRAME_SUBSCRIBERS));
}

#[test]
fn test_dropped_receiver_frees_subscriber_slot() {
    let fx = fixture();
    let rx1 = fx.source.subscribe().unwrap();
    let _rx2 = fx.source.subscribe().unwrap();
    drop(rx1);

    assert!(fx.source.subscribe().is_ok());
}

#[tokio::test]
async fn test_frames_reach_subscriber() {
    let fx = fixture();
    let mut rx = fx.source.subscribe().unwrap();
    fx.source.acquire(&fast_config()).unwrap();

    // One frame at 8kHz / 100ms is 800 samples
    push_samples(&fx.ring, &vec![0.5; 800]);

    let frame = recv_frame(&mut rx).await;
    assert_eq!(frame.seq, 0);
    assert_eq!(frame.data.len(), 1600);

    // 16-bit LE PCM: 0.5 scales to 16383
    let samples = i16_le_to_samples(&frame.data);
    assert!(samples.iter().all(|&s| s == 16383));
}

#[tokio::test]
async fn test_frame_seq_increments() {
    let fx = fixture();
    let mut rx = fx.source.subscribe().unwrap();
    fx.source.acquire(&fast_config()).unwrap();

    push_samples(&fx.ring, &vec![0.1; 1600]);

    let first = recv_frame(&mut rx).await;
    let second = recv_frame(&mut rx).await;
    assert_eq!(first.seq, 0);
    assert_eq!(second.seq, 1);
    assert!(first.timestamp <= second.timestamp);
}

#[tokio::test]
async fn test_both_subscribers_receive_each_frame() {
    let fx = fixture();
    let mut rx1 = fx.source.subscribe().unwrap();
    let mut rx2 = fx.source.subscribe().unwrap();
    fx.source.acquire(&fast_config()).unwrap();

    push_samples(&fx.ring, &vec![0.2; 800]);

    let a = recv_frame(&mut rx1).await;
    let b = recv_frame(&mut rx2).await;
    assert_eq!(a.seq, b.seq);
    // Fan-out shares one allocation per frame
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_stalled_subscriber_drops_frames() {
    let fx = fixture();
    // Subscribe but never consume
    let _rx = fx.source.subscribe().unwrap();
    fx.source.acquire(&fast_config()).unwrap();

    // Twelve frames against a channel that holds eight
    push_samples(&fx.ring, &vec![0.1; 12 * 800]);

    for _ in 0..100 {
        if fx.source.frames_emitted() >= 12 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(fx.source.frames_emitted(), 12);
    assert_eq!(fx.source.frames_dropped(), 4);
}
