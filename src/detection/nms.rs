//! Non-Maximum Averaging.
//!
//! Single-Shot MultiBox Detectors (SSD) produce many overlapping detections for a single object.
//! Instead of discarding all but the most confident one, each cluster of overlapping detections is
//! replaced with its confidence-weighted average, which gives steadier boxes and keypoints.

use itertools::zip_eq;

use crate::{
    num::TotalF32,
    rect::{Rect, Vec2f},
};

use super::{Detection, Keypoint};

/// Merges overlapping detections.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    cluster: Vec<Detection>,
    out_buf: Vec<Detection>,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new suppressor using [`Self::DEFAULT_IOU_THRESH`].
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            cluster: Vec::new(),
            out_buf: Vec::new(),
        }
    }

    /// Performs non-maximum averaging on `detections`.
    ///
    /// `detections` is emptied in the process. The remaining detections are returned as an
    /// iterator, ordered by descending confidence of each cluster's seed.
    pub fn process(
        &mut self,
        detections: &mut Vec<Detection>,
    ) -> impl Iterator<Item = Detection> + '_ {
        self.out_buf.clear();

        // Sort by ascending confidence, process highest confidence first by starting at the back.
        detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

        while let Some(seed) = detections.pop() {
            let seed_rect = seed.bounding_rect();
            let iou_thresh = self.iou_thresh;
            let overlaps = |det: &Detection| seed_rect.iou(&det.bounding_rect()) >= iou_thresh;

            self.cluster.clear();
            let mut i = 0;
            while i < detections.len() {
                if overlaps(&detections[i]) {
                    self.cluster.push(detections.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            // `swap_remove` breaks the ordering.
            detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

            let confidence = seed.confidence();
            self.cluster.push(seed);
            self.out_buf.push(weighted_average(&self.cluster, confidence));
        }

        self.cluster.clear();
        self.out_buf.drain(..)
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of a non-empty cluster of detections.
///
/// The result keeps the seed's `confidence`. Every detection in the cluster must have the same
/// number of keypoints.
fn weighted_average(cluster: &[Detection], confidence: f32) -> Detection {
    let num_keypoints = cluster[0].keypoints().len();
    let mut keypoints = vec![Vec2f::zeros(); num_keypoints];
    let mut center = Vec2f::zeros();
    let mut size = Vec2f::zeros();
    let mut divisor = 0.0;

    for det in cluster {
        let weight = det.confidence();
        divisor += weight;

        for (acc, kp) in zip_eq(&mut keypoints, det.keypoints()) {
            *acc += Vec2f::from(*kp) * weight;
        }
        let rect = det.bounding_rect();
        center += rect.center() * weight;
        size += rect.size() * weight;
    }

    center /= divisor;
    size /= divisor;
    let keypoints = keypoints
        .into_iter()
        .map(|kp| {
            let kp = kp / divisor;
            Keypoint::new(kp.x, kp.y)
        })
        .collect();

    Detection::with_keypoints(
        confidence,
        Rect::from_center(center.x, center.y, size.x, size.y),
        keypoints,
    )
}
