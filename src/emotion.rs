// Emotion classification for normalized face crops

use crate::error::{PipelineError, Result};
use crate::models::{EmotionResult, FaceBuffer, PredictionVector, FACE_SIZE};
use ndarray::Array4;

/// Maps a normalized face crop to a probability per emotion label
pub trait EmotionClassifier {
    /// Runs one forward pass. Any failure is an `InferenceFailure`.
    fn classify(&mut self, face: &FaceBuffer) -> Result<PredictionVector>;

    /// Classifies and applies the argmax decision rule
    fn predict(&mut self, face: &FaceBuffer) -> Result<EmotionResult> {
        Ok(self.classify(face)?.argmax())
    }
}

/// Reshapes a face buffer into the model's NHWC input tensor `[1, 48, 48, 1]`
pub fn to_model_input(face: &FaceBuffer) -> Result<Array4<f32>> {
    Array4::from_shape_vec((1, FACE_SIZE, FACE_SIZE, 1), face.pixels().to_vec()).map_err(|e| {
        PipelineError::InferenceFailure(format!(
            "Failed to create input array with shape [1, {FACE_SIZE}, {FACE_SIZE}, 1]: {e}"
        ))
    })
}

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxEmotionClassifier;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{to_model_input, EmotionClassifier};
    use crate::error::{PipelineError, Result};
    use crate::models::{FaceBuffer, PredictionVector};
    use ort::session::Session;
    use ort::value::Value;
    use std::path::Path;
    use tracing::{debug, error, info};

    /// Emotion classifier using ONNX Runtime
    pub struct OnnxEmotionClassifier {
        session: Session,
    }

    impl OnnxEmotionClassifier {
        /// Creates a new classifier by loading the ONNX model
        pub fn new(model_path: &Path) -> Result<Self> {
            if !model_path.exists() {
                return Err(PipelineError::ModelLoadFailure(format!(
                    "Emotion model not found at {}",
                    model_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e| {
                    PipelineError::ModelLoadFailure(format!(
                        "Failed to create session builder: {e}"
                    ))
                })?
                .commit_from_file(model_path)
                .map_err(|e| {
                    error!("Failed to load emotion model: {}", e);
                    PipelineError::ModelLoadFailure(format!("ONNX model load failed: {e}"))
                })?;

            info!("Loaded emotion model from {}", model_path.display());
            Ok(Self { session })
        }
    }

    impl EmotionClassifier for OnnxEmotionClassifier {
        fn classify(&mut self, face: &FaceBuffer) -> Result<PredictionVector> {
            // Tensors and session outputs live only inside this block.
            let scores: Vec<f32> = {
                let input_tensor = Value::from_array(to_model_input(face)?).map_err(|e| {
                    PipelineError::InferenceFailure(format!("Failed to create input tensor: {e}"))
                })?;

                let outputs = self.session.run(ort::inputs![input_tensor]).map_err(|e| {
                    PipelineError::InferenceFailure(format!("Inference failed: {e}"))
                })?;

                let (_, output_value) = outputs.iter().next().ok_or_else(|| {
                    PipelineError::InferenceFailure("No output from model".to_string())
                })?;

                let (_, data) = output_value.try_extract_tensor::<f32>().map_err(|e| {
                    PipelineError::InferenceFailure(format!("Failed to extract output tensor: {e}"))
                })?;

                data.to_vec()
            };

            debug!("Emotion scores: {:?}", scores);
            PredictionVector::from_model_output(&scores)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmotionLabel;

    struct FixedScores(Vec<f32>);

    impl EmotionClassifier for FixedScores {
        fn classify(&mut self, _face: &FaceBuffer) -> Result<PredictionVector> {
            PredictionVector::from_model_output(&self.0)
        }
    }

    fn gradient_face() -> FaceBuffer {
        let pixels = (0..FACE_SIZE * FACE_SIZE)
            .map(|i| i as f32 / (FACE_SIZE * FACE_SIZE - 1) as f32)
            .collect();
        FaceBuffer::from_pixels(pixels).unwrap()
    }

    #[test]
    fn model_input_is_nhwc_with_single_channel() {
        let face = gradient_face();
        let input = to_model_input(&face).unwrap();
        assert_eq!(input.shape(), &[1, 48, 48, 1]);
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
        assert_eq!(input[[0, 0, 1, 0]], face.get(1, 0).unwrap());
        assert_eq!(input[[0, 1, 0, 0]], face.get(0, 1).unwrap());
        assert_eq!(input[[0, 47, 47, 0]], 1.0);
    }

    #[test]
    fn predict_applies_argmax() {
        let mut classifier = FixedScores(vec![0.1, 0.0, 0.0, 0.1, 0.7, 0.1, 0.0]);
        let result = classifier.predict(&gradient_face()).unwrap();
        assert_eq!(result.emotion, EmotionLabel::Sad);
        assert_eq!(result.confidence_percent(), 70);
    }

    #[test]
    fn malformed_output_is_an_inference_failure() {
        let mut classifier = FixedScores(vec![0.5, 0.5]);
        assert!(matches!(
            classifier.predict(&gradient_face()),
            Err(PipelineError::InferenceFailure(_))
        ));
    }
}
