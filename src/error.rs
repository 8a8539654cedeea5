use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoseError {
    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("unsupported or corrupt image {}: {source}", .path.display())]
    InvalidImageFormat {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("anchor count mismatch: generated {generated}, detector scores {reported}")]
    AnchorMismatch { generated: usize, reported: usize },

    #[error("inference exceeded {:.1}s", .0.as_secs_f32())]
    InferenceTimeout(Duration),

    #[error("inference engine failure: {0:#}")]
    InferenceEngine(#[from] anyhow::Error),

    #[error("unknown target pose: {0}")]
    UnknownTarget(String),

    #[error("unclassified failure: {0}")]
    Unclassified(String),
}

impl PoseError {
    /// Stable machine-readable code, one per variant.
    pub fn code(&self) -> &'static str {
        match self {
            PoseError::ImageNotFound(_) => "IMAGE_NOT_FOUND",
            PoseError::InvalidImageFormat { .. } => "INVALID_IMAGE_FORMAT",
            PoseError::AnchorMismatch { .. } => "ANCHOR_MISMATCH",
            PoseError::InferenceTimeout(_) => "INFERENCE_TIMEOUT",
            PoseError::InferenceEngine(_) => "INFERENCE_ERROR",
            PoseError::UnknownTarget(_) => "TARGET_NOT_FOUND",
            PoseError::Unclassified(_) => "UNCLASSIFIED",
        }
    }
}

pub type Result<T> = std::result::Result<T, PoseError>;
