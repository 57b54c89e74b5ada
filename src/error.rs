use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`extract_pose`](crate::pose::extract_pose).
#[derive(Debug, Error)]
pub enum PoseError {
    #[error("Could not read image from {}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("No pose detected in the image")]
    NoPoseDetected,

    /// The model could not be configured, loaded, or run.
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let err = PoseError::UnreadableImage {
            path: "missing.jpg".into(),
            source: anyhow::anyhow!("file not found"),
        };
        assert_eq!(err.to_string(), "Could not read image from missing.jpg");
        assert_eq!(
            PoseError::NoPoseDetected.to_string(),
            "No pose detected in the image"
        );

        let err = PoseError::from(anyhow::anyhow!("bad model").context("loading"));
        assert_eq!(err.to_string(), "loading");
    }
}
