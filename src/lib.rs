//! Human body pose extraction from single images.
//!
//! A BlazePose person detector locates the most prominent person, and a BlazePose landmark network
//! estimates 33 named body landmarks inside the rotated region around them. Both networks are ONNX
//! files that are loaded at runtime and run with [tract].
//!
//! # Coordinates
//!
//! Image coordinates have X pointing right and Y pointing *down*. Rotations are clockwise as seen
//! on screen. Landmarks returned by [`pose::PoseModel`] are normalized by the image width and
//! height; Z is on the same scale as X, with smaller values being closer to the camera.
//!
//! # Environment Variables
//!
//! * `POSE_MODEL_DIR`: directory containing `pose_detection.onnx` and the
//!   `pose_landmark_{lite,full,heavy}.onnx` networks. Defaults to `models`.
//! * `POSE_MODEL_COMPLEXITY`: landmark network to use, `0` (lite), `1` (full), or `2` (heavy).
//!   Defaults to `2`.
//! * `POSE_MIN_DETECTION_CONFIDENCE`: minimum person detector score, from `0.0` to `1.0`. Defaults
//!   to `0.5`.
//! * `POSE_JPEG_BACKEND`: configures the JPEG decoder to use. Allowed values are:
//!   * `jpeg-decoder`: uses the [jpeg-decoder] crate through [`image`](::image). This is the
//!     default.
//!   * `zune-jpeg`: uses the [zune-jpeg] crate.
//! * `RUST_LOG`: log filter, see [`init_logger!`].
//!
//! [tract]: https://github.com/sonos/tract
//! [zune-jpeg]: https://github.com/etemesi254/zune-jpeg
//! [jpeg-decoder]: https://github.com/image-rs/jpeg-decoder/

use log::LevelFilter;

pub mod body;
pub mod config;
pub mod detection;
pub mod error;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod num;
pub mod pose;
pub mod rect;
pub mod timer;

pub use error::PoseError;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Error)
        .filter(Some(calling_crate), LevelFilter::Warn)
        .filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this library log at *warn* level, dependencies at *error* level. Both can
/// be overridden with the `RUST_LOG` environment variable, eg. `RUST_LOG=extract_pose=debug` logs
/// model loading, detections, the region of interest, and stage timings.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
