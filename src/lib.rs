pub mod catalog;
pub mod config;
pub mod diff;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod service;
pub mod similarity;
pub mod types;

pub use catalog::{TargetCatalog, TargetPose};
pub use config::PipelineConfig;
pub use error::{PoseError, Result};
pub use service::{InferenceWorker, PoseService, ScoreReport};
pub use similarity::{AngleKind, JointAngles, similarity_percent};
pub use types::{Landmark, LandmarkName, Pose, PoseDocument};
