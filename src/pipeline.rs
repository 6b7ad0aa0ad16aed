// Detection loop state machine, scheduling and teardown

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::camera::FrameSource;
use crate::context::ContextBridge;
use crate::emotion::EmotionClassifier;
use crate::error::{PipelineError, Result};
use crate::face::FaceLocator;
use crate::models::{EmotionLabel, EmotionResult, FaceDetection, FACE_PADDING};
use crate::overlay::OverlayScene;
use crate::region::extract_from_landmarks;
use crate::smoother::EmotionWindow;

/// Default pacing of the loop, one cycle per display frame at 30 Hz
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Lifecycle of the detection loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PipelineStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    /// Terminal for this loop; the host keeps running and may start a new one
    Error(String),
}

/// Everything a loop needs, produced by the loader during `Loading`
pub struct PipelineComponents {
    pub source: Box<dyn FrameSource>,
    pub locator: Box<dyn FaceLocator>,
    pub classifier: Box<dyn EmotionClassifier>,
}

/// What a single cycle did
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleOutcome {
    /// The loop was stopped or has failed; no more cycles will run
    Stopped,
    /// The frame was not newer than the last processed one
    Skipped,
    /// The source had no usable frame this time
    NoFrame,
    NoFace,
    /// A face was found but could not be classified
    InferenceFailed,
    Classified {
        raw: EmotionResult,
        stable: EmotionLabel,
    },
}

/// Creates a connected publisher / handle pair
pub fn channel() -> (Publisher, LoopHandle) {
    let (status_tx, status_rx) = watch::channel(PipelineStatus::Uninitialized);
    let (stable_tx, stable_rx) = watch::channel(None);
    let (overlay_tx, overlay_rx) = watch::channel(None);
    let alive = Arc::new(AtomicBool::new(true));

    let publisher = Publisher {
        status: status_tx,
        stable: stable_tx,
        overlay: overlay_tx,
        alive: alive.clone(),
    };
    let handle = LoopHandle {
        status: status_rx,
        stable: stable_rx,
        overlay: overlay_rx,
        alive,
    };
    (publisher, handle)
}

/// Write side of the loop's outputs. Owned by the loop.
pub struct Publisher {
    status: watch::Sender<PipelineStatus>,
    stable: watch::Sender<Option<EmotionLabel>>,
    overlay: watch::Sender<Option<Arc<OverlayScene>>>,
    alive: Arc<AtomicBool>,
}

impl Publisher {
    fn set_status(&self, status: PipelineStatus) {
        info!("Detection loop status: {:?}", status);
        self.status.send_replace(status);
    }

    fn fail(&self, err: &PipelineError) {
        error!("Detection loop failed: {}", err);
        self.alive.store(false, Ordering::SeqCst);
        self.status.send_replace(PipelineStatus::Error(err.to_string()));
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn publish_stable(&self, stable: EmotionLabel) {
        self.stable.send_replace(Some(stable));
    }

    fn publish_overlay(&self, scene: OverlayScene) {
        self.overlay.send_replace(Some(Arc::new(scene)));
    }
}

/// Read side of the loop's outputs plus its stop switch. Cheap to clone.
#[derive(Clone)]
pub struct LoopHandle {
    status: watch::Receiver<PipelineStatus>,
    stable: watch::Receiver<Option<EmotionLabel>>,
    overlay: watch::Receiver<Option<Arc<OverlayScene>>>,
    alive: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Asks the loop to stop. The next cycle sees the flag and releases the frame source;
    /// `DetectionThread::shutdown` also waits for that.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn stable_emotion(&self) -> Option<EmotionLabel> {
        *self.stable.borrow()
    }

    /// Latest scene to draw, if any cycle has produced one
    pub fn overlay(&self) -> Option<Arc<OverlayScene>> {
        self.overlay.borrow().clone()
    }

    pub fn context_bridge(&self) -> ContextBridge {
        ContextBridge::new(self.stable.clone())
    }

    /// Waits until the loop is `Ready` or has failed
    pub async fn settled(&mut self) -> PipelineStatus {
        let settled = self
            .status
            .wait_for(|s| matches!(s, PipelineStatus::Ready | PipelineStatus::Error(_)))
            .await
            .map(|s| s.clone());
        match settled {
            Ok(status) => status,
            // loop thread is gone; report whatever it last published
            Err(_) => self.status(),
        }
    }
}

/// The running detection loop
pub struct DetectionLoop {
    components: PipelineComponents,
    window: EmotionWindow,
    publisher: Publisher,
    last_timestamp: Option<u64>,
    frame_interval: Duration,
    shut_down: bool,
}

impl DetectionLoop {
    /// Loads the components and opens the frame source.
    ///
    /// On failure the status becomes `Error`, the source is released and the error is
    /// returned; no cycle ever runs.
    pub fn start<F>(publisher: Publisher, loader: F) -> Result<Self>
    where
        F: FnOnce() -> Result<PipelineComponents>,
    {
        publisher.set_status(PipelineStatus::Loading);
        Self::open(publisher, loader())
    }

    fn open(publisher: Publisher, loaded: Result<PipelineComponents>) -> Result<Self> {
        let mut components = match loaded {
            Ok(components) => components,
            Err(e) => {
                publisher.fail(&e);
                return Err(e);
            }
        };

        if !publisher.is_alive() {
            info!("Detection loop stopped while loading");
            components.source.stop();
            return Err(PipelineError::Stopped);
        }

        if let Err(e) = components.source.open() {
            components.source.stop();
            publisher.fail(&e);
            return Err(e);
        }

        // stop() may have landed while the device was opening
        if !publisher.is_alive() {
            info!("Detection loop stopped while opening the frame source");
            components.source.stop();
            return Err(PipelineError::Stopped);
        }

        let (width, height) = components.source.resolution();
        info!("Frame source open at {}x{}", width, height);
        publisher.set_status(PipelineStatus::Ready);

        Ok(Self {
            components,
            window: EmotionWindow::new(),
            publisher,
            last_timestamp: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            shut_down: false,
        })
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn window(&self) -> &EmotionWindow {
        &self.window
    }

    /// Runs one full cycle on the next frame
    pub fn cycle(&mut self) -> CycleOutcome {
        if self.shut_down || !self.publisher.is_alive() {
            return CycleOutcome::Stopped;
        }

        let frame = match self.components.source.next_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_terminal() => {
                self.publisher.fail(&e);
                self.shutdown();
                return CycleOutcome::Stopped;
            }
            Err(e) => {
                debug!("Skipping cycle, no frame: {}", e);
                return CycleOutcome::NoFrame;
            }
        };

        if self.last_timestamp.is_some_and(|last| frame.timestamp <= last) {
            return CycleOutcome::Skipped;
        }
        self.last_timestamp = Some(frame.timestamp);

        let detection = self.components.locator.locate(&frame).unwrap_or_else(|e| {
            warn!("Face location failed: {}", e);
            FaceDetection::NotFound
        });
        let FaceDetection::Found(landmarks) = detection else {
            self.publisher.publish_overlay(OverlayScene::video_only(frame));
            return CycleOutcome::NoFace;
        };

        let (bbox, face) = match extract_from_landmarks(&frame, &landmarks, FACE_PADDING) {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("Face extraction failed: {}", e);
                self.publisher.publish_overlay(OverlayScene::video_only(frame));
                return CycleOutcome::NoFace;
            }
        };

        let raw = match self.components.classifier.predict(&face) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Classification failed, treating frame as no face: {}", e);
                self.publisher.publish_overlay(OverlayScene::video_only(frame));
                return CycleOutcome::InferenceFailed;
            }
        };

        let stable = self.window.push(raw.emotion);
        debug!("Raw emotion {} -> stable {}", raw, stable);
        self.publisher.publish_stable(stable);
        self.publisher
            .publish_overlay(OverlayScene::with_face(frame, landmarks, bbox, raw));

        CycleOutcome::Classified { raw, stable }
    }

    /// Cycles on the frame interval until stopped, then releases the source
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.cycle() == CycleOutcome::Stopped {
                break;
            }
        }

        self.shutdown();
    }

    /// Stops the source and clears per-session state. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.publisher.alive.store(false, Ordering::SeqCst);
        self.components.source.stop();
        self.components.locator.reset();
        info!("Detection loop stopped");
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A detection loop running on its own thread. Dropping it tears the loop down.
pub struct DetectionThread {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl DetectionThread {
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Stops the loop and blocks until its thread has released the frame source
    pub fn shutdown(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Detection thread panicked");
            }
        }
    }
}

impl Drop for DetectionThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts a detection loop on its own thread.
///
/// The loader runs on that thread, so the components it builds never cross threads.
pub fn spawn<F, Fut>(frame_interval: Duration, loader: F) -> Result<DetectionThread>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<PipelineComponents>>,
{
    let (publisher, handle) = channel();

    let thread = std::thread::Builder::new()
        .name("detection".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    publisher.fail(&PipelineError::Io(e));
                    return;
                }
            };

            rt.block_on(async move {
                publisher.set_status(PipelineStatus::Loading);
                let loaded = loader().await;
                if let Ok(detection) = DetectionLoop::open(publisher, loaded) {
                    detection.with_frame_interval(frame_interval).run().await;
                }
            });
        })?;

    Ok(DetectionThread {
        handle,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaceBuffer, Frame, Landmark, LandmarkSet, PredictionVector};

    struct StillSource {
        ts: u64,
    }

    impl FrameSource for StillSource {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            self.ts += 1;
            Ok(Frame::new(vec![128; 64 * 64 * 3], 64, 64, self.ts))
        }

        fn stop(&mut self) {}

        fn resolution(&self) -> (u32, u32) {
            (64, 64)
        }
    }

    struct CenterFace;

    impl FaceLocator for CenterFace {
        fn locate(&mut self, _frame: &Frame) -> Result<FaceDetection> {
            let points = vec![Landmark::new(0.25, 0.25), Landmark::new(0.75, 0.75)];
            Ok(LandmarkSet::new(points).map_or(FaceDetection::NotFound, FaceDetection::Found))
        }
    }

    struct AlwaysHappy;

    impl EmotionClassifier for AlwaysHappy {
        fn classify(&mut self, _face: &FaceBuffer) -> Result<PredictionVector> {
            PredictionVector::from_model_output(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0])
        }
    }

    fn components() -> PipelineComponents {
        PipelineComponents {
            source: Box::new(StillSource { ts: 0 }),
            locator: Box::new(CenterFace),
            classifier: Box::new(AlwaysHappy),
        }
    }

    #[test]
    fn status_moves_to_ready_after_start() {
        let (publisher, handle) = channel();
        assert_eq!(handle.status(), PipelineStatus::Uninitialized);
        let _detection = DetectionLoop::start(publisher, || Ok(components())).unwrap();
        assert_eq!(handle.status(), PipelineStatus::Ready);
        assert!(handle.is_alive());
    }

    #[test]
    fn classified_cycle_publishes_stable_and_overlay() {
        let (publisher, handle) = channel();
        let mut detection = DetectionLoop::start(publisher, || Ok(components())).unwrap();
        assert!(handle.overlay().is_none());

        let outcome = detection.cycle();
        assert!(matches!(
            outcome,
            CycleOutcome::Classified {
                stable: EmotionLabel::Happy,
                ..
            }
        ));
        assert_eq!(handle.stable_emotion(), Some(EmotionLabel::Happy));
        let scene = handle.overlay().unwrap();
        assert!(scene.label.is_some());
        assert_eq!(detection.window().len(), 1);
    }

    #[test]
    fn loader_failure_reports_error() {
        let (publisher, handle) = channel();
        let result = DetectionLoop::start(publisher, || {
            Err(PipelineError::ModelLoadFailure("missing".to_string()))
        });
        assert!(result.is_err());
        assert!(matches!(handle.status(), PipelineStatus::Error(msg) if msg.contains("missing")));
        assert!(!handle.is_alive());
    }

    #[test]
    fn stop_during_loading_never_reaches_ready() {
        let (publisher, handle) = channel();
        let loader_handle = handle.clone();
        let result = DetectionLoop::start(publisher, move || {
            loader_handle.stop();
            Ok(components())
        });
        assert!(matches!(result, Err(PipelineError::Stopped)));
        assert_eq!(handle.status(), PipelineStatus::Loading);
    }

    #[test]
    fn stop_ends_cycles() {
        let (publisher, handle) = channel();
        let mut detection = DetectionLoop::start(publisher, || Ok(components())).unwrap();
        handle.stop();
        assert_eq!(detection.cycle(), CycleOutcome::Stopped);
        assert_eq!(detection.cycle(), CycleOutcome::Stopped);
    }
}
