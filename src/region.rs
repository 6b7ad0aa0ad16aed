// Face region extraction: landmark bounding box and 48x48 face buffer

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::error::{PipelineError, Result};
use crate::models::{BoundingBox, FaceBuffer, Frame, LandmarkSet, FACE_SIZE, MIN_FACE_SIZE};

impl BoundingBox {
    /// Computes the face box for `landmarks` in a `frame_width` x `frame_height` frame.
    ///
    /// The landmark extent is grown by `padding` of its size on each axis, centered on
    /// the face, then clipped to the frame. Boxes smaller than `MIN_FACE_SIZE` are grown
    /// around their center (never beyond the frame).
    pub fn from_landmarks(
        landmarks: &LandmarkSet,
        frame_width: u32,
        frame_height: u32,
        padding: f32,
    ) -> Self {
        let padding = padding.max(0.0);
        let (min_x, min_y, max_x, max_y) = landmarks.extent();
        let fw = frame_width as f32;
        let fh = frame_height as f32;

        let raw_w = (max_x - min_x) * fw;
        let raw_h = (max_y - min_y) * fh;
        let pad_w = raw_w * padding;
        let pad_h = raw_h * padding;

        let left = min_x * fw - pad_w / 2.0;
        let top = min_y * fh - pad_h / 2.0;
        let right = left + raw_w + pad_w;
        let bottom = top + raw_h + pad_h;

        let (x, width) = clip_axis(left, right, frame_width);
        let (y, height) = clip_axis(top, bottom, frame_height);
        let (x, width) = grow_axis(x, width, frame_width);
        let (y, height) = grow_axis(y, height, frame_height);

        BoundingBox::new(x, y, width, height)
    }
}

/// Clips `[start, end)` to `[0, limit]`, returning origin and length in whole pixels.
fn clip_axis(start: f32, end: f32, limit: u32) -> (u32, u32) {
    let limit_f = limit as f32;
    let start = start.floor().clamp(0.0, limit_f);
    let end = end.ceil().clamp(0.0, limit_f);
    let origin = start as u32;
    let length = (end - start).max(0.0) as u32;
    (origin.min(limit), length.min(limit - origin.min(limit)))
}

/// Grows a clipped span to the minimum face size, keeping it centered and in bounds.
fn grow_axis(origin: u32, length: u32, limit: u32) -> (u32, u32) {
    let target = MIN_FACE_SIZE.min(limit);
    if length >= target {
        return (origin, length);
    }
    let center = origin as f32 + length as f32 / 2.0;
    let start = (center - target as f32 / 2.0).round().max(0.0) as u32;
    let start = start.min(limit - target);
    (start, target)
}

/// Crops `frame` to `bbox` and resamples it into a normalized 48x48 luminance buffer.
pub fn extract_face(frame: &Frame, bbox: &BoundingBox) -> Result<FaceBuffer> {
    frame.validate()?;
    if bbox.width == 0 || bbox.height == 0 || !bbox.fits_within(frame.width, frame.height) {
        return Err(PipelineError::FrameProcessing(format!(
            "bounding box {bbox:?} does not fit a {}x{} frame",
            frame.width, frame.height
        )));
    }

    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| PipelineError::FrameProcessing("Failed to wrap frame pixels".to_string()))?;

    let face = imageops::crop_imm(&image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    let resized = imageops::resize(
        &face,
        FACE_SIZE as u32,
        FACE_SIZE as u32,
        FilterType::Triangle,
    );
    let gray: GrayImage = imageops::grayscale(&resized);

    let pixels = gray.into_raw().into_iter().map(|p| p as f32 / 255.0).collect();
    FaceBuffer::from_pixels(pixels)
}

/// Computes the bounding box for `landmarks` and extracts the face in one step.
pub fn extract_from_landmarks(
    frame: &Frame,
    landmarks: &LandmarkSet,
    padding: f32,
) -> Result<(BoundingBox, FaceBuffer)> {
    let bbox = BoundingBox::from_landmarks(landmarks, frame.width, frame.height, padding);
    let face = extract_face(frame, &bbox)?;
    Ok((bbox, face))
}
