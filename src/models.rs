// Core data models for the emotion pipeline

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Side length of the face buffer handed to the emotion classifier
pub const FACE_SIZE: usize = 48;

/// Fraction of the landmark extent added around the face on each axis
pub const FACE_PADDING: f32 = 0.10;

/// Smallest bounding box edge (in pixels) the region extractor will produce
pub const MIN_FACE_SIZE: u32 = 8;

/// Represents a single video frame with RGB data
#[derive(Clone, Debug)]
pub struct Frame {
    /// Raw RGB pixel data (width * height * 3 bytes)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Monotonic source timestamp in microseconds
    pub timestamp: u64,
}

impl Frame {
    /// Creates a new Frame with the given parameters
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
        }
    }

    /// Checks that the pixel buffer matches the declared dimensions
    pub fn validate(&self) -> Result<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::FrameProcessing(format!(
                "empty frame ({}x{})",
                self.width, self.height
            )));
        }
        if self.data.len() != expected {
            return Err(PipelineError::FrameProcessing(format!(
                "frame buffer holds {} bytes, expected {expected} for {}x{}",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// A single facial landmark in normalized frame coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn with_depth(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered landmark points of one face. Never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    /// Returns `None` for an empty point list.
    pub fn new(points: Vec<Landmark>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Self { points })
        }
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Normalized extrema as `(min_x, min_y, max_x, max_y)`
    pub fn extent(&self) -> (f32, f32, f32, f32) {
        self.points.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        )
    }
}

/// Outcome of one face locator invocation
#[derive(Clone, Debug, PartialEq)]
pub enum FaceDetection {
    Found(LandmarkSet),
    NotFound,
}

impl FaceDetection {
    pub fn landmarks(&self) -> Option<&LandmarkSet> {
        match self {
            FaceDetection::Found(landmarks) => Some(landmarks),
            FaceDetection::NotFound => None,
        }
    }
}

/// Axis-aligned face region in frame pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the box lies entirely inside a frame of the given size
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x + self.width <= frame_width && self.y + self.height <= frame_height
    }
}

/// Normalized 48x48 single-channel face crop
#[derive(Clone, Debug, PartialEq)]
pub struct FaceBuffer {
    pixels: Vec<f32>,
}

impl FaceBuffer {
    /// Wraps exactly `FACE_SIZE * FACE_SIZE` luminance values in `[0, 1]`.
    pub fn from_pixels(pixels: Vec<f32>) -> Result<Self> {
        if pixels.len() != FACE_SIZE * FACE_SIZE {
            return Err(PipelineError::FrameProcessing(format!(
                "face buffer needs {} pixels, got {}",
                FACE_SIZE * FACE_SIZE,
                pixels.len()
            )));
        }
        Ok(Self { pixels })
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn width(&self) -> usize {
        FACE_SIZE
    }

    pub fn height(&self) -> usize {
        FACE_SIZE
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= FACE_SIZE || y >= FACE_SIZE {
            return None;
        }
        self.pixels.get(y * FACE_SIZE + x).copied()
    }
}

/// Closed set of emotions recognized by the classifier, in model output order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    #[default]
    Neutral,
}

impl EmotionLabel {
    /// All labels in model output order
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    pub const COUNT: usize = 7;

    /// Maps a model output index to its label
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == key)
            .ok_or_else(|| PipelineError::InferenceFailure(format!("unknown emotion label: {s}")))
    }
}

/// Probabilities aligned positionally with `EmotionLabel::ALL`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionVector([f32; EmotionLabel::COUNT]);

impl PredictionVector {
    /// Builds a distribution from raw model output.
    ///
    /// Outputs that are already probabilities are kept as-is, anything else
    /// (logits) goes through a softmax.
    pub fn from_model_output(values: &[f32]) -> Result<Self> {
        let raw: [f32; EmotionLabel::COUNT] = values.try_into().map_err(|_| {
            PipelineError::InferenceFailure(format!(
                "model produced {} scores, expected {}",
                values.len(),
                EmotionLabel::COUNT
            ))
        })?;
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InferenceFailure(
                "model produced non-finite scores".to_string(),
            ));
        }

        let sum: f32 = raw.iter().sum();
        let is_distribution =
            raw.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
        if is_distribution {
            return Ok(Self(raw));
        }

        let max_logit = raw.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp_sum: f32 = raw.iter().map(|&x| (x - max_logit).exp()).sum();
        let mut probabilities = [0.0; EmotionLabel::COUNT];
        for (out, &x) in probabilities.iter_mut().zip(raw.iter()) {
            *out = (x - max_logit).exp() / exp_sum;
        }
        Ok(Self(probabilities))
    }

    pub fn probabilities(&self) -> &[f32; EmotionLabel::COUNT] {
        &self.0
    }

    pub fn probability(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    /// Highest-probability label; ties go to the lower index
    pub fn argmax(&self) -> EmotionResult {
        let (index, confidence) = self
            .0
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });
        let emotion = EmotionLabel::from_index(index).unwrap_or_default();
        EmotionResult::new(emotion, confidence)
    }
}

/// Result of emotion classification containing the emotion and its probability
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionResult {
    /// The detected emotion
    pub emotion: EmotionLabel,
    /// Confidence level (0.0 to 1.0)
    pub confidence: f32,
}

impl EmotionResult {
    /// Creates a new EmotionResult
    pub fn new(emotion: EmotionLabel, confidence: f32) -> Self {
        Self {
            emotion,
            confidence,
        }
    }

    /// Returns the confidence as a percentage (0-100)
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

impl std::fmt::Display for EmotionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}%)", self.emotion, self.confidence_percent())
    }
}
