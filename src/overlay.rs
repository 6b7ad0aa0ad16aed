// Overlay data drawn on top of the video

use crate::face::mesh_connections;
use crate::models::{BoundingBox, EmotionResult, Frame, LandmarkSet};
use std::sync::OnceLock;

/// Text label for the current frame's raw classification, anchored at the face box origin
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayLabel {
    pub text: String,
    pub result: EmotionResult,
    /// Anchor in frame pixels
    pub x: f32,
    pub y: f32,
}

/// Everything needed to redraw one cycle: the video frame plus optional face annotations
#[derive(Clone, Debug)]
pub struct OverlayScene {
    pub frame: Frame,
    pub landmarks: Option<LandmarkSet>,
    pub bbox: Option<BoundingBox>,
    pub label: Option<OverlayLabel>,
}

fn connections() -> &'static [(usize, usize)] {
    static EDGES: OnceLock<Vec<(usize, usize)>> = OnceLock::new();
    EDGES.get_or_init(mesh_connections)
}

impl OverlayScene {
    /// A frame with nothing drawn over it
    pub fn video_only(frame: Frame) -> Self {
        Self {
            frame,
            landmarks: None,
            bbox: None,
            label: None,
        }
    }

    /// A frame with the face mesh and the raw emotion label
    pub fn with_face(
        frame: Frame,
        landmarks: LandmarkSet,
        bbox: BoundingBox,
        result: EmotionResult,
    ) -> Self {
        let label = OverlayLabel {
            text: result.to_string(),
            result,
            x: bbox.x as f32,
            y: bbox.y as f32,
        };
        Self {
            frame,
            landmarks: Some(landmarks),
            bbox: Some(bbox),
            label: Some(label),
        }
    }

    /// Landmark positions in frame pixels
    pub fn points(&self) -> Vec<(f32, f32)> {
        let (w, h) = (self.frame.width as f32, self.frame.height as f32);
        self.landmarks
            .iter()
            .flat_map(|set| set.points().iter().map(move |p| (p.x * w, p.y * h)))
            .collect()
    }

    /// Mesh edges in frame pixels; edges whose landmarks are missing are skipped
    pub fn segments(&self) -> Vec<[(f32, f32); 2]> {
        let Some(landmarks) = &self.landmarks else {
            return Vec::new();
        };
        let (w, h) = (self.frame.width as f32, self.frame.height as f32);
        connections()
            .iter()
            .filter_map(|&(a, b)| {
                let (pa, pb) = (landmarks.get(a)?, landmarks.get(b)?);
                Some([(pa.x * w, pa.y * h), (pb.x * w, pb.y * h)])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::MESH_LANDMARKS;
    use crate::models::{EmotionLabel, Landmark};

    fn frame() -> Frame {
        Frame::new(vec![0; 100 * 50 * 3], 100, 50, 7)
    }

    fn full_mesh() -> LandmarkSet {
        let points = (0..MESH_LANDMARKS)
            .map(|i| Landmark::new(i as f32 / MESH_LANDMARKS as f32, 0.5))
            .collect();
        LandmarkSet::new(points).unwrap()
    }

    #[test]
    fn video_only_scene_draws_nothing() {
        let scene = OverlayScene::video_only(frame());
        assert!(scene.points().is_empty());
        assert!(scene.segments().is_empty());
        assert!(scene.label.is_none());
    }

    #[test]
    fn face_scene_labels_raw_emotion_at_box_origin() {
        let result = EmotionResult::new(EmotionLabel::Surprise, 0.81);
        let scene =
            OverlayScene::with_face(frame(), full_mesh(), BoundingBox::new(12, 4, 30, 30), result);
        let label = scene.label.expect("label");
        assert_eq!((label.x, label.y), (12.0, 4.0));
        assert_eq!(label.text, "surprise (81%)");
        assert_eq!(label.result.emotion, EmotionLabel::Surprise);
    }

    #[test]
    fn segments_cover_full_topology_in_pixels() {
        let result = EmotionResult::new(EmotionLabel::Happy, 0.9);
        let scene =
            OverlayScene::with_face(frame(), full_mesh(), BoundingBox::new(0, 0, 10, 10), result);
        let segments = scene.segments();
        assert_eq!(segments.len(), mesh_connections().len());
        assert!(segments
            .iter()
            .flatten()
            .all(|&(x, y)| (0.0..=100.0).contains(&x) && y == 25.0));
        assert_eq!(scene.points().len(), MESH_LANDMARKS);
    }

    #[test]
    fn sparse_landmarks_skip_missing_edges() {
        let sparse = LandmarkSet::new(vec![Landmark::new(0.1, 0.1); 20]).unwrap();
        let result = EmotionResult::new(EmotionLabel::Sad, 0.5);
        let scene =
            OverlayScene::with_face(frame(), sparse, BoundingBox::new(0, 0, 10, 10), result);
        // no contour edge joins two of the first 20 landmarks
        assert!(scene.segments().is_empty());
    }
}
