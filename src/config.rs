//! Pose model configuration.
//!
//! All settings are read from `POSE_*` environment variables, see the [crate docs](crate).

use std::{
    env::{self, VarError},
    fmt,
    path::PathBuf,
    str::FromStr,
};

use anyhow::{bail, Context};

use crate::image::JpegBackend;

const DEFAULT_MODEL_DIR: &str = "models";

const DETECTOR_MODEL_FILE: &str = "pose_detection.onnx";

/// Which of the landmark networks to use.
///
/// Higher complexity yields more accurate landmarks at the cost of inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelComplexity {
    Lite = 0,
    Full = 1,
    #[default]
    Heavy = 2,
}

impl ModelComplexity {
    /// Returns the file name of the landmark network for this complexity.
    pub fn landmark_model_file(self) -> &'static str {
        match self {
            ModelComplexity::Lite => "pose_landmark_lite.onnx",
            ModelComplexity::Full => "pose_landmark_full.onnx",
            ModelComplexity::Heavy => "pose_landmark_heavy.onnx",
        }
    }
}

impl FromStr for ModelComplexity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            "0" | "lite" => Ok(ModelComplexity::Lite),
            "1" | "full" => Ok(ModelComplexity::Full),
            "2" | "heavy" => Ok(ModelComplexity::Heavy),
            other => bail!("invalid model complexity '{other}' (expected 0, 1, or 2)"),
        }
    }
}

impl fmt::Display for ModelComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Settings for the pose pipeline.
///
/// The pipeline always works in static image mode: the detector runs on every image and no state
/// is carried between images. Segmentation masks are never computed. Neither is configurable.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseConfig {
    /// Directory containing the `.onnx` network files.
    pub model_dir: PathBuf,
    pub model_complexity: ModelComplexity,
    /// Minimum detector score for a person to be considered detected.
    pub min_detection_confidence: f32,
    /// Decoder used for JPEG input images.
    pub jpeg_backend: JpegBackend,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            model_complexity: ModelComplexity::default(),
            min_detection_confidence: 0.5,
            jpeg_backend: JpegBackend::default(),
        }
    }
}

impl PoseConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name))
    }

    /// Reads the configuration using `lookup` to fetch variable values.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Result<String, VarError>,
    ) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = var(&lookup, "POSE_MODEL_DIR")? {
            config.model_dir = dir.into();
        }
        if let Some(complexity) = var(&lookup, "POSE_MODEL_COMPLEXITY")? {
            config.model_complexity = complexity
                .parse()
                .context("invalid value set for `POSE_MODEL_COMPLEXITY`")?;
        }
        if let Some(conf) = var(&lookup, "POSE_MIN_DETECTION_CONFIDENCE")? {
            let conf: f32 = conf.trim().parse().with_context(|| {
                format!("invalid value set for `POSE_MIN_DETECTION_CONFIDENCE`: '{conf}'")
            })?;
            if !(0.0..=1.0).contains(&conf) {
                bail!("`POSE_MIN_DETECTION_CONFIDENCE` must be between 0.0 and 1.0, got {conf}");
            }
            config.min_detection_confidence = conf;
        }
        if let Some(backend) = var(&lookup, "POSE_JPEG_BACKEND")? {
            config.jpeg_backend = backend
                .parse()
                .context("invalid value set for `POSE_JPEG_BACKEND`")?;
        }

        Ok(config)
    }

    /// Path of the person detection network.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    /// Path of the landmark network selected by [`PoseConfig::model_complexity`].
    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir
            .join(self.model_complexity.landmark_model_file())
    }
}

/// Fetches a variable, treating unset and empty variables alike.
fn var(
    lookup: &impl Fn(&str) -> Result<String, VarError>,
    name: &str,
) -> anyhow::Result<Option<String>> {
    match lookup(name) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(s)) => bail!(
            "invalid value set for `{name}` variable: {}",
            s.to_string_lossy()
        ),
    }
}
