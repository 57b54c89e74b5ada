//! Single-image pose extraction.
//!
//! [`extract_pose`] ties everything together: it loads an image, runs a [`PoseModel`] on it, and
//! names the resulting landmarks. [`to_json`] renders the result the way the CLI prints it.

use std::{borrow::Cow, path::Path};

use serde::Serialize;

use crate::body::detection::{roi_from_detection, PoseNetwork};
use crate::body::landmark::{LandmarkIdx, LandmarkNetwork, LandmarkResult};
use crate::config::PoseConfig;
use crate::detection::{Detection, Detector};
use crate::error::PoseError;
use crate::image::{Image, JpegBackend, Resolution};
use crate::landmark::{Estimator, Landmark};
use crate::num::TotalF32;
use crate::timer::Timer;

/// The landmark network's pose flag has to reach this value for a pose to be reported.
const POSE_PRESENCE_THRESHOLD: f32 = 0.5;

/// A pose estimation model.
pub trait PoseModel {
    /// Estimates the landmarks of the most prominent person in `image`.
    ///
    /// Landmark X and Y coordinates are normalized to `[0, 1]` by the image width and height
    /// (values outside of that range are possible for landmarks outside the image). Z is the depth
    /// relative to the hips, on roughly the same scale as X.
    ///
    /// Returns `Ok(None)` if no person was found.
    fn process(&mut self, image: &Image) -> anyhow::Result<Option<Vec<Landmark>>>;
}

/// A named landmark, as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

/// Returns the name of the landmark at `index`.
///
/// The first 33 landmarks use their canonical names (see [`LandmarkIdx::name`]), any further ones
/// are called `landmark_<index>`.
pub fn landmark_name(index: usize) -> Cow<'static, str> {
    match LandmarkIdx::ALL.get(index) {
        Some(idx) => Cow::Borrowed(idx.name()),
        None => Cow::Owned(format!("landmark_{index}")),
    }
}

/// The BlazePose detector and landmark networks, run on a single image.
pub struct BlazePose {
    detector: Detector,
    estimator: Estimator<LandmarkResult>,
}

impl BlazePose {
    /// Loads the networks selected by `config`.
    pub fn load(config: &PoseConfig) -> anyhow::Result<Self> {
        log::debug!("pose config: {:?}", config);

        let mut detector = Detector::new(PoseNetwork::load(config.detector_model_path())?);
        detector.set_threshold(config.min_detection_confidence);
        let estimator = Estimator::new(LandmarkNetwork::load(config.landmark_model_path())?);

        Ok(Self {
            detector,
            estimator,
        })
    }

    fn log_timers(&self) {
        for timer in self.detector.timers().chain(self.estimator.timers()) {
            log::debug!("{timer}");
        }
    }
}

impl PoseModel for BlazePose {
    fn process(&mut self, image: &Image) -> anyhow::Result<Option<Vec<Landmark>>> {
        let detections = self.detector.detect(image)?;
        log::debug!("{} person detection(s)", detections.len());

        let Some(best) = best_detection(detections) else {
            self.log_timers();
            return Ok(None);
        };
        log::trace!("best detection: {:?}", best);
        let roi = roi_from_detection(best)?;
        log::debug!("pose RoI: {:?}", roi);

        let result = self.estimator.estimate_roi(image, roi)?;
        log::debug!("pose presence: {}", result.presence());
        let landmarks = normalize_pose(
            result.presence(),
            result.pose_landmarks(),
            image.resolution(),
        );

        self.log_timers();
        Ok(landmarks)
    }
}

/// Picks the most confident detection.
fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .max_by_key(|det| TotalF32(det.confidence()))
}

/// Turns landmarks in image pixels into normalized landmarks.
///
/// X is divided by the image width, Y by the height, and Z by the width. Returns `None` if the
/// pose presence score is below [`POSE_PRESENCE_THRESHOLD`].
fn normalize_pose(
    presence: f32,
    landmarks: impl Iterator<Item = Landmark>,
    image_res: Resolution,
) -> Option<Vec<Landmark>> {
    if presence < POSE_PRESENCE_THRESHOLD {
        return None;
    }

    let (w, h) = (image_res.width() as f32, image_res.height() as f32);
    Some(
        landmarks
            .map(|lm| {
                let [x, y, z] = lm.position();
                lm.with_position([x / w, y / h, z / w])
            })
            .collect(),
    )
}

/// Loads and decodes the image at `path`.
pub fn load_image(path: &Path, jpeg_backend: JpegBackend) -> Result<Image, PoseError> {
    let timer = Timer::new("decode");
    let image = timer
        .time(|| Image::load(path, jpeg_backend))
        .map_err(|source| PoseError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?;
    log::debug!("loaded {:?} from '{}' ({timer})", image, path.display());
    Ok(image)
}

/// Runs `model` on `image` and names the resulting landmarks.
pub fn detect_keypoints(
    image: &Image,
    model: &mut dyn PoseModel,
) -> Result<Vec<Keypoint>, PoseError> {
    let landmarks = model.process(image)?.ok_or(PoseError::NoPoseDetected)?;

    Ok(landmarks
        .iter()
        .enumerate()
        .map(|(i, lm)| Keypoint {
            name: landmark_name(i).into_owned(),
            x: lm.x(),
            y: lm.y(),
            z: lm.z(),
            visibility: lm.visibility().unwrap_or(0.0),
        })
        .collect())
}

/// Extracts the named pose landmarks from the image at `path`.
pub fn extract_pose(
    path: &Path,
    jpeg_backend: JpegBackend,
    model: &mut dyn PoseModel,
) -> Result<Vec<Keypoint>, PoseError> {
    let image = load_image(path, jpeg_backend)?;
    detect_keypoints(&image, model)
}

/// Renders keypoints as a pretty-printed JSON array.
pub fn to_json(keypoints: &[Keypoint]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(keypoints)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use approx::assert_abs_diff_eq;

    use crate::image::Color;
    use crate::rect::Rect;

    use super::*;

    fn white_image() -> Image {
        Image::from_fn(2, 2, |_, _| Color::from_rgb8(255, 255, 255))
    }

    /// Returns `count` landmarks at fixed positions, or no pose if `count` is `None`.
    struct FakeModel {
        count: Option<usize>,
        calls: usize,
    }

    impl FakeModel {
        fn new(count: Option<usize>) -> Self {
            Self { count, calls: 0 }
        }
    }

    impl PoseModel for FakeModel {
        fn process(&mut self, _image: &Image) -> anyhow::Result<Option<Vec<Landmark>>> {
            self.calls += 1;
            Ok(self.count.map(|count| {
                (0..count)
                    .map(|i| Landmark::new([0.5, 0.25, -0.125]).with_visibility(i as f32 / 64.0))
                    .collect()
            }))
        }
    }

    struct FailingModel;

    impl PoseModel for FailingModel {
        fn process(&mut self, _image: &Image) -> anyhow::Result<Option<Vec<Landmark>>> {
            anyhow::bail!("network exploded")
        }
    }

    fn write_png(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let image = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 128, 255]));
        let mut data = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut data, image::ImageOutputFormat::Png)
            .unwrap();
        let path = dir.path().join("person.png");
        std::fs::write(&path, data.into_inner()).unwrap();
        path
    }

    #[test]
    fn names() {
        assert_eq!(landmark_name(0), "nose");
        assert_eq!(landmark_name(11), "left_shoulder");
        assert_eq!(landmark_name(32), "right_foot_index");
        assert_eq!(landmark_name(33), "landmark_33");
    }

    #[test]
    fn names_landmarks_in_order() {
        let image = white_image();
        let keypoints = detect_keypoints(&image, &mut FakeModel::new(Some(33))).unwrap();
        assert_eq!(keypoints.len(), 33);
        assert_eq!(keypoints[0].name, "nose");
        assert_eq!(keypoints[11].name, "left_shoulder");
        assert_eq!(keypoints[32].name, "right_foot_index");
        assert_eq!(
            keypoints[2],
            Keypoint {
                name: "left_eye".into(),
                x: 0.5,
                y: 0.25,
                z: -0.125,
                visibility: 2.0 / 64.0,
            }
        );
    }

    #[test]
    fn extra_landmarks_get_generic_names() {
        let image = white_image();
        let keypoints = detect_keypoints(&image, &mut FakeModel::new(Some(35))).unwrap();
        assert_eq!(keypoints.len(), 35);
        assert_eq!(keypoints[32].name, "right_foot_index");
        assert_eq!(keypoints[33].name, "landmark_33");
        assert_eq!(keypoints[34].name, "landmark_34");
    }

    #[test]
    fn no_pose() {
        let image = white_image();
        let err = detect_keypoints(&image, &mut FakeModel::new(None)).unwrap_err();
        assert!(matches!(err, PoseError::NoPoseDetected), "{err:?}");
        assert_eq!(err.to_string(), "No pose detected in the image");
    }

    #[test]
    fn model_errors_propagate() {
        let image = white_image();
        let err = detect_keypoints(&image, &mut FailingModel).unwrap_err();
        assert!(matches!(err, PoseError::Model(_)), "{err:?}");
        assert_eq!(err.to_string(), "network exploded");
    }

    #[test]
    fn extract_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir);

        let mut model = FakeModel::new(Some(33));
        let keypoints = extract_pose(&path, JpegBackend::default(), &mut model).unwrap();
        assert_eq!(keypoints.len(), 33);
        assert_eq!(model.calls, 1);
    }

    #[test]
    fn unreadable_image_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = FakeModel::new(Some(33));

        let missing = dir.path().join("missing.jpg");
        let err = extract_pose(&missing, JpegBackend::default(), &mut model).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Could not read image from {}", missing.display())
        );

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"this is not an image").unwrap();
        let err = extract_pose(&garbage, JpegBackend::default(), &mut model).unwrap_err();
        assert!(matches!(err, PoseError::UnreadableImage { .. }), "{err:?}");

        assert_eq!(model.calls, 0);
    }

    #[test]
    fn best_detection_is_most_confident() {
        assert!(best_detection(&[]).is_none());

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let detections = [
            Detection::new(0.6, rect),
            Detection::new(0.9, rect),
            Detection::new(0.7, rect),
        ];
        assert_eq!(best_detection(&detections).unwrap().confidence(), 0.9);
    }

    #[test]
    fn normalize_non_square() {
        let landmarks = [
            Landmark::new([100.0, 50.0, 20.0]).with_visibility(0.8),
            Landmark::new([-20.0, 150.0, -40.0]),
        ];
        let res = Resolution::new(200, 100);

        let normalized = normalize_pose(0.9, landmarks.into_iter(), res).unwrap();
        assert_eq!(normalized.len(), 2);
        assert_abs_diff_eq!(normalized[0].x(), 0.5);
        assert_abs_diff_eq!(normalized[0].y(), 0.5);
        assert_abs_diff_eq!(normalized[0].z(), 0.1);
        assert_eq!(normalized[0].visibility(), Some(0.8));

        // Landmarks outside of the image are not clamped.
        assert_abs_diff_eq!(normalized[1].x(), -0.1);
        assert_abs_diff_eq!(normalized[1].y(), 1.5);
        assert_abs_diff_eq!(normalized[1].z(), -0.2);
    }

    #[test]
    fn low_presence_is_no_pose() {
        let landmarks = || std::iter::once(Landmark::new([1.0, 1.0, 0.0]));
        let res = Resolution::new(10, 10);
        assert!(normalize_pose(0.49, landmarks(), res).is_none());
        assert!(normalize_pose(0.5, landmarks(), res).is_some());
    }

    #[test]
    fn json_shape() {
        let keypoints = vec![Keypoint {
            name: "nose".into(),
            x: 0.5,
            y: 0.25,
            z: -0.125,
            visibility: 1.0,
        }];
        let json = to_json(&keypoints).unwrap();
        assert_eq!(
            json,
            "[\n  {\n    \"name\": \"nose\",\n    \"x\": 0.5,\n    \"y\": 0.25,\n    \"z\": -0.125,\n    \"visibility\": 1.0\n  }\n]"
        );
        assert_eq!(to_json(&[]).unwrap(), "[]");
    }
}
