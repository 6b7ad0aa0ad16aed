// Face landmark location with the MediaPipe Face Mesh model

use crate::error::Result;
use crate::models::{FaceDetection, Frame, LandmarkSet};

/// Produces the landmarks of the most prominent face in a frame.
pub trait FaceLocator {
    /// `NotFound` when no face is visible; errors are reserved for failed inference.
    fn locate(&mut self, frame: &Frame) -> Result<FaceDetection>;

    /// Forget any state carried over from previous frames.
    fn reset(&mut self) {}
}

/// Number of landmarks produced by the Face Mesh network
pub const MESH_LANDMARKS: usize = 468;

/// Side length of the Face Mesh input image
pub const MESH_INPUT_SIZE: u32 = 192;

/// Growth applied to the previous face box before it is reused as the next crop
pub const TRACKING_MARGIN: f32 = 0.25;

const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];
const LIPS_OUTER: &[usize] = &[
    61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291, 409, 270, 269, 267, 0, 37, 39, 40, 185,
];
const LIPS_INNER: &[usize] = &[
    78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308, 415, 310, 311, 312, 13, 82, 81, 80, 191,
];
const LEFT_EYE: &[usize] = &[
    263, 249, 390, 373, 374, 380, 381, 382, 362, 398, 384, 385, 386, 387, 388, 466,
];
const RIGHT_EYE: &[usize] = &[
    33, 7, 163, 144, 145, 153, 154, 155, 133, 173, 157, 158, 159, 160, 161, 246,
];
const LEFT_EYEBROW: &[usize] = &[276, 283, 282, 295, 285, 300, 293, 334, 296, 336];
const RIGHT_EYEBROW: &[usize] = &[46, 53, 52, 65, 55, 70, 63, 105, 66, 107];

/// Closed contours of the face mesh
const CLOSED_CONTOURS: &[&[usize]] = &[FACE_OVAL, LIPS_OUTER, LIPS_INNER, LEFT_EYE, RIGHT_EYE];

/// Open contours of the face mesh
const OPEN_CONTOURS: &[&[usize]] = &[LEFT_EYEBROW, RIGHT_EYEBROW];

/// Edges of the fixed face mesh contour graph as landmark index pairs.
pub fn mesh_connections() -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for contour in CLOSED_CONTOURS {
        edges.extend(contour.windows(2).map(|pair| (pair[0], pair[1])));
        if let (Some(&first), Some(&last)) = (contour.first(), contour.last()) {
            edges.push((last, first));
        }
    }
    for contour in OPEN_CONTOURS {
        edges.extend(contour.windows(2).map(|pair| (pair[0], pair[1])));
    }
    edges
}

/// Square crop of a frame in pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareRegion {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl SquareRegion {
    /// Largest centered square of the frame.
    pub fn centered(frame_width: u32, frame_height: u32) -> Self {
        let size = frame_width.min(frame_height) as f32;
        Self {
            x: (frame_width as f32 - size) / 2.0,
            y: (frame_height as f32 - size) / 2.0,
            size,
        }
    }

    /// Square around the landmark extent, grown by `margin` and shifted inside the frame.
    pub fn around(
        landmarks: &LandmarkSet,
        frame_width: u32,
        frame_height: u32,
        margin: f32,
    ) -> Self {
        let (min_x, min_y, max_x, max_y) = landmarks.extent();
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let center_x = (min_x + max_x) / 2.0 * fw;
        let center_y = (min_y + max_y) / 2.0 * fh;
        let extent = ((max_x - min_x) * fw).max((max_y - min_y) * fh);
        let size = (extent * (1.0 + margin)).max(1.0).min(fw.min(fh));
        Self {
            x: (center_x - size / 2.0).min(fw - size).max(0.0),
            y: (center_y - size / 2.0).min(fh - size).max(0.0),
            size,
        }
    }

    /// Maps a point in network input pixels back to normalized frame coordinates.
    pub fn to_frame(&self, px: f32, py: f32, frame_width: u32, frame_height: u32) -> (f32, f32) {
        let scale = self.size / MESH_INPUT_SIZE as f32;
        (
            (self.x + px * scale) / frame_width as f32,
            (self.y + py * scale) / frame_height as f32,
        )
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxFaceLocator;

#[cfg(feature = "onnx")]
mod onnx {
    use super::{
        sigmoid, FaceLocator, SquareRegion, MESH_INPUT_SIZE, MESH_LANDMARKS, TRACKING_MARGIN,
    };
    use crate::error::{PipelineError, Result};
    use crate::models::{FaceDetection, Frame, Landmark, LandmarkSet};
    use image::imageops::{self, FilterType};
    use image::RgbImage;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::{DynValue, Tensor};
    use std::path::Path;
    use tracing::{debug, info};

    /// ONNX Runtime wrapper for the MediaPipe Face Mesh model
    pub struct OnnxFaceLocator {
        session: Session,
        threshold: f32,
        tracked: Option<SquareRegion>,
    }

    impl OnnxFaceLocator {
        pub fn new(model_path: &Path, threshold: f32) -> Result<Self> {
            if !model_path.exists() {
                return Err(PipelineError::ModelLoadFailure(format!(
                    "Face mesh model not found at {}",
                    model_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e| PipelineError::ModelLoadFailure(format!("ORT session builder: {e}")))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| PipelineError::ModelLoadFailure(format!("ORT opt level: {e}")))?
                .commit_from_file(model_path)
                .map_err(|e| PipelineError::ModelLoadFailure(format!("ORT load model: {e}")))?;

            info!("Loaded face mesh model from {}", model_path.display());
            Ok(Self {
                session,
                threshold,
                tracked: None,
            })
        }

        /// Runs the network on `region`, returning raw landmark coordinates and the
        /// face presence score.
        fn run_mesh(&mut self, frame: &Frame, region: &SquareRegion) -> Result<(Vec<f32>, f32)> {
            let tensor = crop_to_tensor(frame, region)?;

            let outputs = self
                .session
                .run(ort::inputs![tensor])
                .map_err(|e| PipelineError::InferenceFailure(format!("ORT run failed: {e}")))?;

            let mut values = outputs.iter().map(|(_, value)| {
                value
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| PipelineError::InferenceFailure(format!("ORT extract: {e}")))
            });

            let coords = values
                .next()
                .ok_or_else(|| PipelineError::InferenceFailure("ORT returned no outputs".into()))??;
            let flag = values.next().ok_or_else(|| {
                PipelineError::InferenceFailure("Face mesh returned no presence score".into())
            })??;
            let score = flag.first().copied().map(sigmoid).unwrap_or(0.0);

            Ok((coords, score))
        }
    }

    impl FaceLocator for OnnxFaceLocator {
        fn locate(&mut self, frame: &Frame) -> Result<FaceDetection> {
            frame.validate()?;
            let region = self
                .tracked
                .unwrap_or_else(|| SquareRegion::centered(frame.width, frame.height));

            let (coords, score) = self.run_mesh(frame, &region)?;
            if score < self.threshold || coords.len() < MESH_LANDMARKS * 3 {
                debug!("No face (presence {:.2})", score);
                self.tracked = None;
                return Ok(FaceDetection::NotFound);
            }

            let points = coords
                .chunks_exact(3)
                .take(MESH_LANDMARKS)
                .map(|c| {
                    let (x, y) = region.to_frame(c[0], c[1], frame.width, frame.height);
                    Landmark::with_depth(x, y, c[2] / MESH_INPUT_SIZE as f32)
                })
                .collect();

            match LandmarkSet::new(points) {
                Some(landmarks) => {
                    self.tracked = Some(SquareRegion::around(
                        &landmarks,
                        frame.width,
                        frame.height,
                        TRACKING_MARGIN,
                    ));
                    Ok(FaceDetection::Found(landmarks))
                }
                None => {
                    self.tracked = None;
                    Ok(FaceDetection::NotFound)
                }
            }
        }

        fn reset(&mut self) {
            self.tracked = None;
        }
    }

    /// Crop `region`, resize to the network input and convert to a `[1, 3, 192, 192]`
    /// tensor normalized to [-1, 1].
    fn crop_to_tensor(frame: &Frame, region: &SquareRegion) -> Result<DynValue> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| PipelineError::FrameProcessing("Failed to wrap frame pixels".into()))?;

        let x = region.x.max(0.0) as u32;
        let y = region.y.max(0.0) as u32;
        let size = (region.size as u32).max(1);
        let crop = imageops::crop_imm(&image, x, y, size, size).to_image();
        let resized: RgbImage =
            imageops::resize(&crop, MESH_INPUT_SIZE, MESH_INPUT_SIZE, FilterType::Triangle);

        let side = MESH_INPUT_SIZE as usize;
        let mut chw = vec![0.0f32; 3 * side * side];
        for (px, py, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let idx = c * side * side + py as usize * side + px as usize;
                chw[idx] = pixel[c] as f32 / 255.0 * 2.0 - 1.0;
            }
        }

        let shape = vec![1usize, 3, side, side];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Tensor::into_dyn)
            .map_err(|e| PipelineError::InferenceFailure(format!("ORT tensor: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Landmark;
    use approx::assert_relative_eq;

    #[test]
    fn connections_close_loops_and_stay_in_mesh() {
        let edges = mesh_connections();
        assert!(edges.contains(&(109, 10)), "face oval closes");
        assert!(edges.contains(&(246, 33)), "right eye closes");
        assert!(!edges.contains(&(107, 46)), "eyebrows stay open");
        assert!(edges
            .iter()
            .all(|&(a, b)| a < MESH_LANDMARKS && b < MESH_LANDMARKS));
        let expected: usize = CLOSED_CONTOURS.iter().map(|c| c.len()).sum::<usize>()
            + OPEN_CONTOURS.iter().map(|c| c.len() - 1).sum::<usize>();
        assert_eq!(edges.len(), expected);
    }

    #[test]
    fn centered_region_is_largest_square() {
        let region = SquareRegion::centered(640, 480);
        assert_eq!(region, SquareRegion { x: 80.0, y: 0.0, size: 480.0 });
    }

    #[test]
    fn tracked_region_grows_and_stays_inside() {
        let landmarks = LandmarkSet::new(vec![Landmark::new(0.5, 0.5), Landmark::new(0.75, 0.75)])
            .unwrap();
        let region = SquareRegion::around(&landmarks, 400, 400, TRACKING_MARGIN);
        assert_relative_eq!(region.size, 125.0);
        assert_relative_eq!(region.x, 187.5);

        let edge =
            LandmarkSet::new(vec![Landmark::new(0.9, 0.9), Landmark::new(1.0, 1.0)]).unwrap();
        let region = SquareRegion::around(&edge, 400, 400, TRACKING_MARGIN);
        assert!(region.x + region.size <= 400.0);
        assert!(region.y + region.size <= 400.0);
    }

    #[test]
    fn network_points_map_back_to_frame() {
        let region = SquareRegion { x: 80.0, y: 0.0, size: 480.0 };
        let (x, y) = region.to_frame(96.0, 192.0, 640, 480);
        assert_relative_eq!(x, 0.5);
        assert_relative_eq!(y, 1.0);
    }

    #[test]
    fn sigmoid_is_centered() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(8.0) > 0.99);
        assert!(sigmoid(-8.0) < 0.01);
    }
}
