use std::{env, path::PathBuf, time::Duration};

use crate::models::{default_detector_model_path, default_landmark_model_path};
use crate::pipeline::{detector::DetectorOutputContract, landmarks::LandmarkOutputContract};

const DEFAULT_TIMEOUT_SECS: f32 = 5.0;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub detector_model_path: PathBuf,
    pub landmark_model_path: PathBuf,
    /// Execution provider to try before falling back to CPU, e.g. `xnnpack`.
    pub delegate: Option<String>,
    pub targets_dir: PathBuf,
    pub infer_timeout: Duration,
    pub intra_threads: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub cache_capacity: usize,
    pub detector_outputs: DetectorOutputContract,
    pub landmark_outputs: LandmarkOutputContract,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_model_path: default_detector_model_path(),
            landmark_model_path: default_landmark_model_path(),
            delegate: None,
            targets_dir: PathBuf::from("targets"),
            infer_timeout: Duration::from_secs_f32(DEFAULT_TIMEOUT_SECS),
            intra_threads: 2,
            score_threshold: 0.5,
            nms_threshold: 0.3,
            cache_capacity: 64,
            detector_outputs: DetectorOutputContract::default(),
            landmark_outputs: LandmarkOutputContract::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `BLAZEPOSE_DET_MODEL`, `BLAZEPOSE_LMK_MODEL`,
    /// `BLAZEPOSE_DELEGATE`, `TARGETS_DIR` and `INFER_TIMEOUT_SEC`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(path) = lookup("BLAZEPOSE_DET_MODEL") {
            cfg.detector_model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("BLAZEPOSE_LMK_MODEL") {
            cfg.landmark_model_path = PathBuf::from(path);
        }
        cfg.delegate = lookup("BLAZEPOSE_DELEGATE").filter(|d| !d.trim().is_empty());
        if let Some(dir) = lookup("TARGETS_DIR") {
            cfg.targets_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("INFER_TIMEOUT_SEC") {
            match raw.trim().parse::<f32>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => {
                    cfg.infer_timeout = Duration::from_secs_f32(secs);
                }
                _ => log::warn!("ignoring invalid INFER_TIMEOUT_SEC={raw:?}"),
            }
        }
        cfg
    }
}
