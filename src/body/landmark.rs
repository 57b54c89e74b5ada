//! Body pose landmark prediction.

use std::path::Path;

use anyhow::{bail, Context};

use crate::landmark::{Estimate, Landmark, Landmarks, Network};
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};
use crate::num::sigmoid;

/// Number of body landmarks, see [`LandmarkIdx`].
pub const NUM_POSE_LANDMARKS: usize = 33;

/// Number of auxiliary landmarks the network computes after the body landmarks. They are used
/// for RoI tracking across video frames.
const NUM_AUX_LANDMARKS: usize = 6;

/// Values per landmark in the network output: X, Y, Z, visibility, presence.
const VALUES_PER_LANDMARK: usize = 5;

#[derive(Debug, Clone)]
pub struct LandmarkResult {
    pose_presence: f32,
    landmarks: Landmarks,
}

impl Default for LandmarkResult {
    fn default() -> Self {
        Self {
            pose_presence: 0.0,
            landmarks: Landmarks::new(NUM_POSE_LANDMARKS + NUM_AUX_LANDMARKS),
        }
    }
}

impl Estimate for LandmarkResult {
    #[inline]
    fn landmarks_mut(&mut self) -> &mut Landmarks {
        &mut self.landmarks
    }
}

impl LandmarkResult {
    /// Returns the 33 body landmarks, in [`LandmarkIdx`] order.
    pub fn pose_landmarks(&self) -> impl Iterator<Item = Landmark> + '_ {
        (0..NUM_POSE_LANDMARKS).map(|i| self.landmarks.get(i))
    }

    /// Returns the probability that a body is present in the region of interest.
    #[inline]
    pub fn presence(&self) -> f32 {
        self.pose_presence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIdx {
    /// All body landmarks, in network output order.
    pub const ALL: [LandmarkIdx; NUM_POSE_LANDMARKS] = {
        use LandmarkIdx::*;
        [
            Nose,
            LeftEyeInner,
            LeftEye,
            LeftEyeOuter,
            RightEyeInner,
            RightEye,
            RightEyeOuter,
            LeftEar,
            RightEar,
            MouthLeft,
            MouthRight,
            LeftShoulder,
            RightShoulder,
            LeftElbow,
            RightElbow,
            LeftWrist,
            RightWrist,
            LeftPinky,
            RightPinky,
            LeftIndex,
            RightIndex,
            LeftThumb,
            RightThumb,
            LeftHip,
            RightHip,
            LeftKnee,
            RightKnee,
            LeftAnkle,
            RightAnkle,
            LeftHeel,
            RightHeel,
            LeftFootIndex,
            RightFootIndex,
        ]
    };

    /// Returns the canonical `snake_case` name of this landmark.
    pub fn name(self) -> &'static str {
        use LandmarkIdx::*;
        match self {
            Nose => "nose",
            LeftEyeInner => "left_eye_inner",
            LeftEye => "left_eye",
            LeftEyeOuter => "left_eye_outer",
            RightEyeInner => "right_eye_inner",
            RightEye => "right_eye",
            RightEyeOuter => "right_eye_outer",
            LeftEar => "left_ear",
            RightEar => "right_ear",
            MouthLeft => "mouth_left",
            MouthRight => "mouth_right",
            LeftShoulder => "left_shoulder",
            RightShoulder => "right_shoulder",
            LeftElbow => "left_elbow",
            RightElbow => "right_elbow",
            LeftWrist => "left_wrist",
            RightWrist => "right_wrist",
            LeftPinky => "left_pinky",
            RightPinky => "right_pinky",
            LeftIndex => "left_index",
            RightIndex => "right_index",
            LeftThumb => "left_thumb",
            RightThumb => "right_thumb",
            LeftHip => "left_hip",
            RightHip => "right_hip",
            LeftKnee => "left_knee",
            RightKnee => "right_knee",
            LeftAnkle => "left_ankle",
            RightAnkle => "right_ankle",
            LeftHeel => "left_heel",
            RightHeel => "right_heel",
            LeftFootIndex => "left_foot_index",
            RightFootIndex => "right_foot_index",
        }
    }
}

/// A BlazePose landmark network (lite, full, or heavy variant).
pub struct LandmarkNetwork {
    cnn: Cnn,
}

impl LandmarkNetwork {
    /// Loads a landmark network from an ONNX file.
    ///
    /// Only the first two outputs (landmarks and pose flag, in either order) are computed;
    /// segmentation, heatmap, and world landmark outputs are pruned from the graph.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        log::debug!("loading pose landmark network from '{}'", path.display());

        let nn = NeuralNetwork::from_path(path)?
            .with_output_selection([0, 1])
            .load()
            .with_context(|| format!("failed to load landmark network '{}'", path.display()))?;
        let cnn = Cnn::new(nn, ColorMapper::linear(0.0..=1.0))?;
        Ok(Self { cnn })
    }
}

impl Network for LandmarkNetwork {
    type Output = LandmarkResult;

    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut Self::Output) -> anyhow::Result<()> {
        extract(outputs, estimate)
    }
}

fn extract(outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
    if outputs.len() != 2 {
        bail!("landmark network has {} outputs, expected 2", outputs.len());
    }

    // Exported models disagree on the output order, so identify the outputs by size.
    let expected = (NUM_POSE_LANDMARKS + NUM_AUX_LANDMARKS) * VALUES_PER_LANDMARK;
    let sizes = [outputs[0].as_raw_data().len(), outputs[1].as_raw_data().len()];
    let (screen_landmarks, pose_flag) = match sizes {
        [n, 1] if n == expected => (&outputs[0], &outputs[1]),
        [1, n] if n == expected => (&outputs[1], &outputs[0]),
        _ => bail!(
            "landmark network outputs have shapes {:?} and {:?}, expected {} values and a single \
             pose flag",
            outputs[0].shape(),
            outputs[1].shape(),
            expected,
        ),
    };

    estimate.pose_presence = pose_flag.as_raw_data()[0];

    for (i, values) in screen_landmarks
        .as_raw_data()
        .chunks_exact(VALUES_PER_LANDMARK)
        .enumerate()
    {
        let [x, y, z, visibility, presence]: [f32; VALUES_PER_LANDMARK] = values.try_into()?;
        estimate.landmarks.set(
            i,
            Landmark::new([x, y, z])
                .with_visibility(sigmoid(visibility))
                .with_presence(sigmoid(presence)),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::nn::tensor::Tensor;

    use super::*;

    #[test]
    fn names() {
        assert_eq!(LandmarkIdx::ALL.len(), NUM_POSE_LANDMARKS);
        for (i, idx) in LandmarkIdx::ALL.into_iter().enumerate() {
            assert_eq!(idx as usize, i);
        }
        assert_eq!(LandmarkIdx::Nose.name(), "nose");
        assert_eq!(LandmarkIdx::LeftShoulder.name(), "left_shoulder");
        assert_eq!(LandmarkIdx::RightFootIndex.name(), "right_foot_index");
    }

    fn make_outputs(tensors: [Tensor; 2]) -> Outputs {
        tensors.into_iter().collect()
    }

    fn landmark_tensor() -> Tensor {
        let values = (0..39).flat_map(|i| [i as f32, 2.0 * i as f32, -1.0, 0.0, 100.0]);
        Tensor::from_iter(&[1, 195], values)
    }

    #[test]
    fn extract_landmarks() {
        let outputs = make_outputs([landmark_tensor(), Tensor::from_iter(&[1, 1], [0.75])]);

        let mut result = LandmarkResult::default();
        extract(&outputs, &mut result).unwrap();

        assert_eq!(result.presence(), 0.75);
        assert_eq!(result.pose_landmarks().count(), 33);

        let wrist = result
            .pose_landmarks()
            .nth(LandmarkIdx::LeftWrist as usize)
            .unwrap();
        assert_eq!(wrist.position(), [15.0, 30.0, -1.0]);
        assert_abs_diff_eq!(wrist.visibility().unwrap(), 0.5);
        assert_abs_diff_eq!(wrist.presence().unwrap(), 1.0);
    }

    #[test]
    fn extract_swapped_outputs() {
        let outputs = make_outputs([Tensor::from_iter(&[1, 1], [0.25]), landmark_tensor()]);

        let mut result = LandmarkResult::default();
        extract(&outputs, &mut result).unwrap();

        assert_eq!(result.presence(), 0.25);
        let nose = result.pose_landmarks().next().unwrap();
        assert_eq!(nose.position(), [0.0, 0.0, -1.0]);
    }

    #[test]
    fn extract_rejects_wrong_shapes() {
        let short = Tensor::from_iter(&[1, 165], std::iter::repeat(0.0).take(165));
        let outputs = make_outputs([short, Tensor::from_iter(&[1, 1], [1.0])]);
        assert!(extract(&outputs, &mut LandmarkResult::default()).is_err());

        // A segmentation mask in place of the pose flag.
        let mask = Tensor::from_iter(&[1, 4, 4, 1], std::iter::repeat(0.0).take(16));
        let outputs = make_outputs([landmark_tensor(), mask]);
        let err = extract(&outputs, &mut LandmarkResult::default()).unwrap_err();
        assert!(err.to_string().contains("[1, 4, 4, 1]"), "{err}");

        let single: Outputs = std::iter::once(landmark_tensor()).collect();
        assert!(extract(&single, &mut LandmarkResult::default()).is_err());
    }
}
