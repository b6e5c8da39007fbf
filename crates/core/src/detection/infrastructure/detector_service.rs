use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::OnceCell;

use crate::detection::domain::detected_face::DetectedFace;
use crate::detection::domain::face_detector::{DetectError, FaceDetector};
use crate::shared::constants::MODEL_RETRY_INTERVAL;
use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face model failed to load: {0}")]
    Load(#[source] DetectError),
    #[error("face model loader panicked")]
    LoaderPanicked,
    #[error("face model failed to load recently, next attempt in {:.1}s", .0.as_secs_f64())]
    RetryPending(Duration),
    #[error("face model is not loaded")]
    NotReady,
    #[error("face detector panicked: {0}")]
    Panicked(String),
    #[error("inference failed: {0}")]
    Inference(#[source] DetectError),
}

type Loader = dyn Fn() -> Result<Box<dyn FaceDetector>, DetectError> + Send + Sync;

/// Process-wide detection capability shared by every session.
///
/// The model is loaded lazily by the first `ensure_ready` caller; concurrent
/// callers wait on the same load. After a failed load, callers get
/// [`DetectorError::RetryPending`] until the retry interval has passed.
pub struct DetectorService {
    loader: Arc<Loader>,
    detector: OnceCell<Mutex<Box<dyn FaceDetector>>>,
    retry_interval: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl DetectorService {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FaceDetector>, DetectError> + Send + Sync + 'static,
    {
        Self {
            loader: Arc::new(loader),
            detector: OnceCell::new(),
            retry_interval: MODEL_RETRY_INTERVAL,
            last_failure: Mutex::new(None),
        }
    }

    /// Minimum time between two load attempts.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Wraps an already-constructed detector; `ensure_ready` is then a no-op.
    pub fn with_detector(detector: Box<dyn FaceDetector>) -> Self {
        Self {
            loader: Arc::new(|| -> Result<Box<dyn FaceDetector>, DetectError> {
                Err("detector supplied at construction".into())
            }),
            detector: OnceCell::new_with(Some(Mutex::new(detector))),
            retry_interval: MODEL_RETRY_INTERVAL,
            last_failure: Mutex::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.detector.initialized()
    }

    /// Loads the model once. Runs the loader on the blocking pool.
    pub async fn ensure_ready(&self) -> Result<(), DetectorError> {
        self.detector
            .get_or_try_init(|| async {
                if let Some(wait) = self.retry_wait() {
                    return Err(DetectorError::RetryPending(wait));
                }
                let loader = Arc::clone(&self.loader);
                let started = Instant::now();
                let loaded = match tokio::task::spawn_blocking(move || loader()).await {
                    Ok(loaded) => loaded.map_err(DetectorError::Load),
                    Err(_) => Err(DetectorError::LoaderPanicked),
                };
                let detector = match loaded {
                    Ok(detector) => detector,
                    Err(e) => {
                        log::warn!(
                            "{e}; retrying in {:.0}s",
                            self.retry_interval.as_secs_f64()
                        );
                        *self.failure_slot() = Some(Instant::now());
                        return Err(e);
                    }
                };
                log::info!(
                    "Face detector ready in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
                Ok::<_, DetectorError>(Mutex::new(detector))
            })
            .await
            .map(|_| ())
    }

    /// Runs detection synchronously. Call from a blocking context after
    /// `ensure_ready` has succeeded.
    ///
    /// A panic inside the detector fails only this frame; the detector stays
    /// usable for the next one.
    pub fn detect_blocking(&self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectorError> {
        let detector = self.detector.get().ok_or(DetectorError::NotReady)?;
        let mut guard = detector.lock().unwrap_or_else(PoisonError::into_inner);
        match panic::catch_unwind(AssertUnwindSafe(|| guard.detect(frame))) {
            Ok(result) => result.map_err(DetectorError::Inference),
            Err(payload) => Err(DetectorError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    fn failure_slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left before the next load attempt is allowed, if any.
    fn retry_wait(&self) -> Option<Duration> {
        let failed_at = (*self.failure_slot())?;
        self.retry_interval.checked_sub(failed_at.elapsed()).filter(|d| !d.is_zero())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingDetector {
        calls: usize,
    }

    impl FaceDetector for CountingDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, DetectError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err("even call".into())
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, 0)
    }

    #[tokio::test]
    async fn test_concurrent_first_use_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let service = Arc::new(DetectorService::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Box::new(CountingDetector { calls: 0 }) as Box<dyn FaceDetector>)
        }));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.ensure_ready().await })
            })
            .collect();
        for result in futures_util::future::join_all(waiters).await {
            result.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(service.is_ready());
    }

    fn fails_first_load(attempts: &Arc<AtomicUsize>) -> DetectorService {
        let counter = Arc::clone(attempts);
        DetectorService::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("weights missing".into())
            } else {
                Ok(Box::new(CountingDetector { calls: 0 }) as Box<dyn FaceDetector>)
            }
        })
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let service = fails_first_load(&attempts).with_retry_interval(Duration::ZERO);

        assert!(matches!(
            service.ensure_ready().await,
            Err(DetectorError::Load(_))
        ));
        assert!(!service.is_ready());
        service.ensure_ready().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_load_waits_for_retry_interval() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let service = fails_first_load(&attempts).with_retry_interval(Duration::from_millis(200));

        assert!(matches!(
            service.ensure_ready().await,
            Err(DetectorError::Load(_))
        ));
        for _ in 0..5 {
            assert!(matches!(
                service.ensure_ready().await,
                Err(DetectorError::RetryPending(_))
            ));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        service.ensure_ready().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detect_before_ready_is_error() {
        let service = DetectorService::new(|| Err("unused".into()));
        assert!(matches!(
            service.detect_blocking(&frame()),
            Err(DetectorError::NotReady)
        ));
    }

    struct PanicsOnceDetector {
        panicked: bool,
    }

    impl FaceDetector for PanicsOnceDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, DetectError> {
            if !self.panicked {
                self.panicked = true;
                panic!("tensor shape mismatch");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_detector_panic_fails_one_frame_only() {
        let service = DetectorService::with_detector(Box::new(PanicsOnceDetector { panicked: false }));

        match service.detect_blocking(&frame()) {
            Err(DetectorError::Panicked(message)) => assert_eq!(message, "tensor shape mismatch"),
            other => panic!("expected panic to be reported, got {other:?}"),
        }
        for _ in 0..3 {
            assert!(service.detect_blocking(&frame()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_with_detector_is_ready_and_surfaces_inference_errors() {
        let service = DetectorService::with_detector(Box::new(CountingDetector { calls: 0 }));
        assert!(service.is_ready());
        assert!(service.detect_blocking(&frame()).is_ok());
        assert!(matches!(
            service.detect_blocking(&frame()),
            Err(DetectorError::Inference(_))
        ));
    }
}
