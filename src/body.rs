//! BlazePose human body pose estimation.
//!
//! Pose estimation runs in two stages: [`detection::PoseNetwork`] finds a person in the image and
//! computes a rotated region of interest around them, then a [`landmark::LandmarkNetwork`]
//! estimates the body landmarks inside that region.

pub mod detection;
pub mod landmark;
