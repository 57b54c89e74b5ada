//! Common functionality for object detection.
//!
//! The functionality defined in this module (and submodules) is meant to be reusable across
//! different single-shot detectors.

pub mod nms;
pub mod ssd;

use crate::image::{AsImageView, ImageView, Resolution};
use crate::nn::{Cnn, Outputs};
use crate::rect::{vec2, Rect};
use crate::timer::Timer;

use self::nms::NonMaxSuppression;

/// Trait implemented by neural networks that detect objects in an input image.
pub trait Network {
    /// Returns the [`Cnn`] to use for detection.
    fn cnn(&self) -> &Cnn;

    /// Extracts all detections with confidence above `threshold` from the network's output.
    ///
    /// Keypoint and detection positions are expected to be in the coordinate system of the
    /// network's input.
    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()>;
}

/// A generic object detector.
///
/// This type wraps a [`Network`] for object detection.
pub struct Detector {
    network: Box<dyn Network>,
    detections: Vec<Detection>,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
    thresh: f32,
    nms: NonMaxSuppression,
}

impl Detector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new<N: Network + 'static>(network: N) -> Self {
        Self {
            network: Box::new(network),
            detections: Vec::new(),
            t_infer: Timer::new("detect/infer"),
            t_extract: Timer::new("detect/extract"),
            t_nms: Timer::new("detect/nms"),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
        }
    }

    #[inline]
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    /// Runs the detector on `image`.
    ///
    /// The returned detections are in `image`'s coordinate system, in no particular order.
    pub fn detect<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<&[Detection]> {
        self.detect_impl(image.as_view())
    }

    fn detect_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<&[Detection]> {
        self.detections.clear();

        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();
        let aspect = input_res
            .aspect_ratio()
            .ok_or_else(|| anyhow::anyhow!("detector has zero-sized input {input_res}"))?;

        // If the input image's aspect ratio doesn't match the CNN's input, create an oversized view
        // that does.
        let rect = image.rect().grow_to_fit_aspect(aspect);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;
        log::trace!("inference result: {:?}", outputs);

        self.t_extract.time(|| {
            self.network
                .extract(&outputs, self.thresh, &mut self.detections)
        })?;
        log::trace!("{} raw detections", self.detections.len());

        self.t_nms.time(|| {
            let merged = self.nms.process(&mut self.detections).collect::<Vec<_>>();
            self.detections = merged;
        });

        map_to_image(&mut self.detections, rect, input_res);

        Ok(&self.detections)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

/// Maps detections from network input coordinates into the coordinate system of `rect`'s parent.
///
/// `rect` is the (possibly letterboxed) area of the image that was scaled to `input_res`.
fn map_to_image(detections: &mut [Detection], rect: Rect, input_res: Resolution) {
    let scale = rect.width() / input_res.width() as f32;
    for det in detections {
        let center = det.rect.center() * scale;
        let size = det.rect.size() * scale;
        det.rect = Rect::from_center(center.x, center.y, size.x, size.y).move_by(rect.top_left());
        for kp in &mut det.keypoints {
            kp.x = kp.x * scale + rect.x();
            kp.y = kp.y * scale + rect.y();
        }
    }
}

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value, and a
/// possibly empty set of located keypoints.
///
/// The confidence value lies between 0.0 and 1.0 (the sigmoid of the raw network score). It is the
/// weight used by non-maximum averaging, so it has to stay in that range.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned bounding rectangle containing the detected object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }
}

/// A 2D keypoint produced as part of a [`Detection`].
///
/// The meaning of a keypoint depends on the specific detector and on its index in the keypoint
/// list. Typically keypoints are used to crop/rotate a detected object for further processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

impl From<Keypoint> for crate::rect::Vec2f {
    fn from(kp: Keypoint) -> Self {
        vec2(kp.x, kp.y)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn map_letterboxed_detection() {
        // A 200x100 image is letterboxed into a 200x200 square starting 50 pixels above it.
        let image = Rect::from_top_left(0.0, 0.0, 200.0, 100.0);
        let rect = image.grow_to_fit_aspect(1.0);
        let input_res = Resolution::new(224, 224);

        let mut detections = [Detection::with_keypoints(
            0.9,
            Rect::from_center(112.0, 112.0, 56.0, 112.0),
            vec![Keypoint::new(112.0, 56.0), Keypoint::new(0.0, 224.0)],
        )];
        map_to_image(&mut detections, rect, input_res);

        let det = &detections[0];
        assert_eq!(det.confidence(), 0.9);
        let bbox = det.bounding_rect();
        assert_abs_diff_eq!(bbox.center().x, 100.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.center().y, 50.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.width(), 50.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.height(), 100.0, epsilon = 1e-4);

        let [top, corner] = [det.keypoints()[0], det.keypoints()[1]];
        assert_abs_diff_eq!(top.x(), 100.0, epsilon = 1e-4);
        assert_abs_diff_eq!(top.y(), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(corner.x(), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(corner.y(), 150.0, epsilon = 1e-4);
    }

    #[test]
    fn map_unpadded_detection() {
        let rect = Rect::from_top_left(0.0, 0.0, 448.0, 448.0);
        let mut detections = [Detection::with_keypoints(
            0.5,
            Rect::from_top_left(10.0, 20.0, 30.0, 40.0),
            vec![Keypoint::new(5.0, 6.0)],
        )];
        map_to_image(&mut detections, rect, Resolution::new(224, 224));

        let bbox = detections[0].bounding_rect();
        assert_abs_diff_eq!(bbox.x(), 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(bbox.y(), 40.0, epsilon = 1e-4);
        assert_eq!(detections[0].keypoints()[0], Keypoint::new(10.0, 12.0));
    }
}
