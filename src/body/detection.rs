//! Human body detection.

use std::{f32::consts::FRAC_PI_2, path::Path};

use anyhow::{bail, Context};

use crate::detection::{
    self,
    ssd::{Anchor, Anchors, LayerInfo},
    Detection, Network,
};
use crate::image::Resolution;
use crate::nn::{Cnn, ColorMapper, NeuralNetwork, Outputs};
use crate::num::{normalize_radians, sigmoid};
use crate::rect::{Rect, RotatedRect, Vec2f};

/// Number of values the network outputs per anchor: box center and size, then 4 keypoints.
const VALUES_PER_ANCHOR: usize = 12;

/// Factor the keypoint-derived region of interest is enlarged by.
const ROI_SCALE: f32 = 1.25;

/// Body pose detection network.
///
/// Use with [`Detector`](crate::detection::Detector).
///
/// This network detects human bodies and computes the keypoints documented in [`Keypoint`].
pub struct PoseNetwork {
    cnn: Cnn,
    anchors: Anchors,
}

impl PoseNetwork {
    /// Loads the detection network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        log::debug!("loading pose detector from '{}'", path.display());

        let nn = NeuralNetwork::from_path(path)?
            .load()
            .with_context(|| format!("failed to load pose detector '{}'", path.display()))?;
        let cnn = Cnn::new(nn, ColorMapper::linear(-1.0..=1.0))?;
        let anchors = Anchors::calculate(&[
            LayerInfo::new(2, 28, 28),
            LayerInfo::new(2, 14, 14),
            LayerInfo::new(6, 7, 7),
        ]);

        Ok(Self { cnn, anchors })
    }
}

impl Network for PoseNetwork {
    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        extract_outputs(
            self.cnn.input_resolution(),
            &self.anchors,
            outputs,
            threshold,
            detections,
        )
    }
}

fn extract_outputs(
    input_res: Resolution,
    anchors: &Anchors,
    outputs: &Outputs,
    thresh: f32,
    detections: &mut Vec<Detection>,
) -> anyhow::Result<()> {
    let num_anchors = anchors.anchor_count();
    if outputs.len() != 2 {
        bail!("pose detector has {} outputs, expected 2", outputs.len());
    }

    // Exported models don't agree on the output order, so identify them by shape.
    let (boxes, confidences) = if outputs[0].shape().last() == Some(&VALUES_PER_ANCHOR) {
        (&outputs[0], &outputs[1])
    } else {
        (&outputs[1], &outputs[0])
    };

    if boxes.shape() != [1, num_anchors, VALUES_PER_ANCHOR] {
        bail!(
            "unexpected pose detector box tensor shape {:?}",
            boxes.shape()
        );
    }
    if confidences.shape() != [1, num_anchors, 1] {
        bail!(
            "unexpected pose detector score tensor shape {:?}",
            confidences.shape()
        );
    }

    for (index, view) in confidences.index([0]).iter().enumerate() {
        let conf = sigmoid(view.as_slice()[0]);
        if conf < thresh {
            continue;
        }

        let box_params = boxes.index([0, index]).as_slice();
        detections.push(extract_detection(
            &anchors[index],
            input_res,
            box_params,
            conf,
        ));
    }

    Ok(())
}

fn extract_detection(
    anchor: &Anchor,
    input_res: Resolution,
    box_params: &[f32],
    confidence: f32,
) -> Detection {
    let input_w = input_res.width() as f32;
    let input_h = input_res.height() as f32;

    let xc = box_params[0] + anchor.x_center() * input_w;
    let yc = box_params[1] + anchor.y_center() * input_h;
    let w = box_params[2];
    let h = box_params[3];
    let keypoints = box_params[4..]
        .chunks_exact(2)
        .map(|kp| {
            detection::Keypoint::new(
                kp[0] + anchor.x_center() * input_w,
                kp[1] + anchor.y_center() * input_h,
            )
        })
        .collect();

    Detection::with_keypoints(confidence, Rect::from_center(xc, yc, w, h), keypoints)
}

/// Keypoints estimated by the detection network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    /// Center of the hips.
    Hips = 0,
    /// Point on the circle enclosing the full body, straight "above" [`Keypoint::Hips`].
    FullBodyScale = 1,
    /// Center of the shoulders.
    Shoulders = 2,
    /// Point on the circle enclosing the upper body, straight "above" [`Keypoint::Shoulders`].
    UpperBodyScale = 3,
}

impl Keypoint {
    fn of(self, detection: &Detection) -> anyhow::Result<Vec2f> {
        match detection.keypoints().get(self as usize) {
            Some(&kp) => Ok(kp.into()),
            None => bail!(
                "pose detection has {} keypoints, {:?} is missing",
                detection.keypoints().len(),
                self,
            ),
        }
    }
}

/// Computes the region of interest to run the landmark network on from a body detection.
///
/// The region is a square centered on the hips, rotated so that the body points up, and large
/// enough to contain the whole body.
pub fn roi_from_detection(detection: &Detection) -> anyhow::Result<RotatedRect> {
    let center = Keypoint::Hips.of(detection)?;
    let scale = Keypoint::FullBodyScale.of(detection)?;

    let d = scale - center;
    let rotation = normalize_radians(FRAC_PI_2 - f32::atan2(-d.y, d.x));
    let size = 2.0 * d.norm() * ROI_SCALE;

    Ok(RotatedRect::new(
        Rect::from_center(center.x, center.y, size, size),
        rotation,
    ))
}
