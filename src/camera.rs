// Camera module for webcam capture

use crate::error::Result;
use crate::models::Frame;
use std::time::Instant;

/// A live source of video frames
pub trait FrameSource {
    /// Acquires the device. Failure is `DeviceUnavailable`.
    fn open(&mut self) -> Result<()>;

    /// Returns the most recent frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Releases the device. Safe to call more than once.
    fn stop(&mut self);

    /// Current capture resolution
    fn resolution(&self) -> (u32, u32);
}

/// Hands out strictly increasing microsecond timestamps relative to when the source opened
#[derive(Debug)]
pub struct FrameClock {
    started: Instant,
    last: Option<u64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: None,
        }
    }

    pub fn next_timestamp(&mut self) -> u64 {
        let now = self.started.elapsed().as_micros() as u64;
        let ts = match self.last {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last = Some(ts);
        ts
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "camera")]
pub use self::device::{CameraManager, CameraReconnector};

#[cfg(feature = "camera")]
mod device {
    use super::{FrameClock, FrameSource};
    use crate::config::AppConfig;
    use crate::error::{PipelineError, Result};
    use crate::models::Frame;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;
    use std::time::Duration;
    use tracing::{error, info, warn};

    /// Manages camera capture for the detection loop
    pub struct CameraManager {
        camera: Camera,
        clock: FrameClock,
        is_running: bool,
    }

    impl CameraManager {
        /// Creates a new CameraManager for the configured device and format
        pub fn new(config: &AppConfig) -> Result<Self> {
            let requested_format = RequestedFormat::new::<RgbFormat>(
                RequestedFormatType::Closest(nokhwa::utils::CameraFormat::new(
                    nokhwa::utils::Resolution::new(config.camera_width, config.camera_height),
                    nokhwa::utils::FrameFormat::YUYV,
                    config.camera_fps,
                )),
            );

            // Some systems start device numbering at 1
            let camera = Self::try_open_camera(config.camera_index, requested_format)
                .or_else(|_| Self::try_open_camera(config.camera_index + 1, requested_format))
                .map_err(|e| {
                    error!("Failed to initialize camera: {}", e);
                    PipelineError::DeviceUnavailable(format!(
                        "Could not open camera. Make sure a camera is connected, no other \
                         app is using it and camera permissions are granted. Error: {e}"
                    ))
                })?;

            Ok(Self {
                camera,
                clock: FrameClock::new(),
                is_running: false,
            })
        }

        fn try_open_camera(index: u32, requested_format: RequestedFormat) -> Result<Camera> {
            Camera::new(CameraIndex::Index(index), requested_format).map_err(PipelineError::from)
        }

        /// Lists available camera devices
        pub fn list_devices() -> Result<Vec<String>> {
            let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto).map_err(|e| {
                PipelineError::DeviceUnavailable(format!("Failed to query cameras: {e}"))
            })?;

            Ok(devices
                .iter()
                .map(|info| info.human_name().to_string())
                .collect())
        }

        /// Returns the camera information
        pub fn camera_info(&self) -> String {
            self.camera.info().human_name().to_string()
        }

        pub fn is_running(&self) -> bool {
            self.is_running
        }
    }

    impl FrameSource for CameraManager {
        fn open(&mut self) -> Result<()> {
            if self.is_running {
                return Ok(());
            }

            self.camera.open_stream().map_err(|e| {
                error!("Failed to open camera stream: {}", e);
                PipelineError::DeviceUnavailable(e.to_string())
            })?;

            // Give the device a moment before checking that frames arrive
            std::thread::sleep(Duration::from_millis(200));
            if let Err(e) = self.camera.frame() {
                error!("Camera stream not working: {}", e);
                let _ = self.camera.stop_stream();
                return Err(PipelineError::DeviceUnavailable(format!(
                    "Camera stream not working: {e}. Make sure camera permissions are granted."
                )));
            }

            self.is_running = true;
            self.clock = FrameClock::new();
            info!("Camera stream open: {}", self.camera_info());
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            if !self.is_running {
                return Err(PipelineError::DeviceUnavailable(
                    "camera stream is not open".to_string(),
                ));
            }

            let frame_data = self.camera.frame().map_err(PipelineError::from)?;
            let buffer = frame_data.decode_image::<RgbFormat>().map_err(|e| {
                PipelineError::FrameProcessing(format!("Failed to decode frame: {e}"))
            })?;

            let (width, height) = (buffer.width(), buffer.height());
            Ok(Frame::new(
                buffer.into_raw(),
                width,
                height,
                self.clock.next_timestamp(),
            ))
        }

        fn stop(&mut self) {
            if !self.is_running {
                return;
            }
            self.is_running = false;

            if let Err(e) = self.camera.stop_stream() {
                error!("Error stopping camera stream: {}", e);
            } else {
                info!("Camera stream stopped");
            }
        }

        fn resolution(&self) -> (u32, u32) {
            let res = self.camera.resolution();
            (res.width(), res.height())
        }
    }

    impl Drop for CameraManager {
        fn drop(&mut self) {
            self.stop();
        }
    }

    /// Retries opening the camera a bounded number of times
    pub struct CameraReconnector {
        config: AppConfig,
        max_attempts: u32,
        retry_interval: Duration,
    }

    impl CameraReconnector {
        pub fn new(config: AppConfig) -> Self {
            Self {
                config,
                max_attempts: 5,
                retry_interval: Duration::from_secs(2),
            }
        }

        pub fn with_attempts(mut self, max_attempts: u32) -> Self {
            self.max_attempts = max_attempts.max(1);
            self
        }

        /// Attempts to open the camera stream with retries
        pub async fn reconnect(&self) -> Result<CameraManager> {
            info!("Attempting to open camera");

            let mut last_error = None;
            for attempt in 1..=self.max_attempts {
                let opened = CameraManager::new(&self.config).and_then(|mut manager| {
                    manager.open()?;
                    Ok(manager)
                });

                match opened {
                    Ok(manager) => {
                        info!("Camera opened on attempt {}", attempt);
                        return Ok(manager);
                    }
                    Err(e) => {
                        warn!(
                            "Camera attempt {}/{} failed: {}",
                            attempt, self.max_attempts, e
                        );
                        last_error = Some(e);
                        if attempt < self.max_attempts {
                            tokio::time::sleep(self.retry_interval).await;
                        }
                    }
                }
            }

            error!(
                "Failed to open camera after {} attempts",
                self.max_attempts
            );
            Err(last_error.unwrap_or_else(|| {
                PipelineError::DeviceUnavailable("Max reconnection attempts exceeded".to_string())
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_increasing() {
        let mut clock = FrameClock::new();
        let mut previous = clock.next_timestamp();
        for _ in 0..1000 {
            let ts = clock.next_timestamp();
            assert!(ts > previous);
            previous = ts;
        }
    }
}
