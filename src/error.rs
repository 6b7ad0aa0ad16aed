// Error types for the InnerLight emotion pipeline

use thiserror::Error;

/// Main error type for the emotion pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Model loading failed: {0}")]
    ModelLoadFailure(String),

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Frame processing failed: {0}")]
    FrameProcessing(String),

    #[error("Chat request failed: {0}")]
    Chat(String),

    #[error("Detection loop stopped before it was ready")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// Whether this error stops the pipeline for the rest of the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::DeviceUnavailable(_) | PipelineError::ModelLoadFailure(_)
        )
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

// Conversion from reqwest errors
impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Chat(format!("request timed out: {err}"))
        } else if let Some(status) = err.status() {
            PipelineError::Chat(format!("backend returned {status}"))
        } else {
            PipelineError::Chat(err.to_string())
        }
    }
}

// Conversion from nokhwa errors
#[cfg(feature = "camera")]
impl From<nokhwa::NokhwaError> for PipelineError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                PipelineError::DeviceUnavailable(format!("Device {device}: {error}"))
            }
            nokhwa::NokhwaError::OpenStreamError(error) => {
                PipelineError::DeviceUnavailable(format!("Stream: {error}"))
            }
            nokhwa::NokhwaError::ReadFrameError(error) => PipelineError::FrameProcessing(error),
            nokhwa::NokhwaError::ProcessFrameError { src, destination, error } => {
                PipelineError::FrameProcessing(format!("{src:?} -> {destination}: {error}"))
            }
            _ => PipelineError::DeviceUnavailable(err.to_string()),
        }
    }
}

// Conversion from ONNX Runtime errors
#[cfg(feature = "onnx")]
impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        PipelineError::InferenceFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_terminal() {
        assert!(PipelineError::DeviceUnavailable("denied".into()).is_terminal());
        assert!(PipelineError::ModelLoadFailure("missing".into()).is_terminal());
        assert!(!PipelineError::InferenceFailure("nan".into()).is_terminal());
        assert!(!PipelineError::FrameProcessing("decode".into()).is_terminal());
    }

    #[test]
    fn io_errors_convert() {
        let err: PipelineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert_eq!(err.to_string(), "IO error: gone");
    }
}
