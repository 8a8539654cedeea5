pub mod common;
pub mod detector;
pub mod engine;
pub mod landmarks;
pub mod ort;
pub mod projection;
pub mod roi;
pub mod skeleton;

// Re-exports for convenience
pub use common::{FRAME_SIZE, LetterboxInfo, load_frame};
pub use engine::{InferenceEngine, RawTensor};
pub use ort::OrtEngine;
pub use skeleton::draw_pose;
