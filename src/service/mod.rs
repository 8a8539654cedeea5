pub mod cache;
pub mod worker;

use std::{
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use serde::Serialize;

pub use cache::{CacheKey, PoseCache};
pub use worker::InferenceWorker;

use crate::{
    catalog::TargetPose,
    config::PipelineConfig,
    error::{PoseError, Result},
    pipeline::{
        OrtEngine,
        common::{
            DETECTOR_INPUT_SIZE, FRAME_SIZE, LANDMARK_INPUT_SIZE, PixelRange, frame_to_tensor,
            letterbox_frame, load_frame, resize_frame,
        },
        detector::{
            Anchor, AnchorOptions, DetectorConfig, DetectorOutputContract, best_detection,
            generate_anchors, select_detector_outputs,
        },
        engine::InferenceEngine,
        landmarks::{LandmarkOutputContract, decode_landmarks},
        projection::project_landmarks,
        roi::{RectTransform, RoiAffine, rect_from_alignment_points, transform_rect, warp_affine},
    },
    similarity::{AngleKind, similarity_percent},
    types::{Frame, Pose},
};

/// Outcome of scoring one image against a target.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreReport {
    /// Percentage in [0, 100].
    pub similarity: f32,
    pub body_found: bool,
}

impl ScoreReport {
    pub fn new(pose: &Pose, target: &TargetPose, angles: &[AngleKind]) -> Self {
        Self {
            similarity: similarity_percent(pose, target, angles),
            body_found: !pose.is_empty(),
        }
    }
}

/// Runs the two-stage pipeline with a cache in front of it. Engine calls
/// are serialized; image decoding and letterboxing happen outside the lock.
pub struct PoseService<E: InferenceEngine = OrtEngine> {
    engine: Mutex<E>,
    anchors: Vec<Anchor>,
    detector: DetectorConfig,
    detector_outputs: DetectorOutputContract,
    landmark_outputs: LandmarkOutputContract,
    cache: Mutex<PoseCache>,
}

impl PoseService<OrtEngine> {
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let engine = OrtEngine::from_config(cfg)?;
        Self::new(engine, cfg)
    }
}

impl<E: InferenceEngine> PoseService<E> {
    pub fn new(engine: E, cfg: &PipelineConfig) -> Result<Self> {
        let anchors = generate_anchors(&AnchorOptions::default());
        match engine.detector_anchor_count() {
            Some(reported) if reported != anchors.len() => {
                return Err(PoseError::AnchorMismatch {
                    generated: anchors.len(),
                    reported,
                });
            }
            Some(_) => {}
            None => log::warn!("detector output shape is dynamic, anchor count checked per call"),
        }

        Ok(Self {
            engine: Mutex::new(engine),
            anchors,
            detector: DetectorConfig {
                score_threshold: cfg.score_threshold,
                nms_threshold: cfg.nms_threshold,
            },
            detector_outputs: cfg.detector_outputs.clone(),
            landmark_outputs: cfg.landmark_outputs.clone(),
            cache: Mutex::new(PoseCache::new(cfg.cache_capacity)),
        })
    }

    /// Landmarks for the image at `path` in source pixels; empty when
    /// nobody is found. Results are cached per file version.
    pub fn infer(&self, path: &Path) -> Result<Pose> {
        let key = cache_key(path)?;
        if let Some(pose) = self.lock_cache().get(&key) {
            log::debug!("cache hit for {}", key.path.display());
            return Ok(pose.clone());
        }

        let frame = load_frame(&key.path)?;
        let pose = self.infer_frame(&frame)?;
        self.lock_cache().insert(key, pose.clone());
        Ok(pose)
    }

    /// Uncached pipeline run over an already decoded frame.
    pub fn infer_frame(&self, frame: &Frame) -> Result<Pose> {
        let (working, letterbox) = letterbox_frame(frame, FRAME_SIZE)?;
        let detector_frame = resize_frame(&working, DETECTOR_INPUT_SIZE, DETECTOR_INPUT_SIZE)?;
        let detector_input = frame_to_tensor(&detector_frame, PixelRange::MinusOneToOne)?;

        let (rect, landmark_outputs) = {
            let mut engine = self.lock_engine();
            let outputs = engine.run_detector(detector_input)?;
            let (boxes, scores) = select_detector_outputs(&outputs, &self.detector_outputs)?;
            let Some(detection) = best_detection(boxes, scores, &self.anchors, &self.detector)?
            else {
                log::debug!("no person detected");
                return Ok(Pose::empty());
            };
            log::debug!("person detected with score {:.3}", detection.score);

            let rect = transform_rect(
                &rect_from_alignment_points(detection.mid_hip, detection.scale_point),
                FRAME_SIZE,
                FRAME_SIZE,
                &RectTransform::default(),
            );
            let affine = RoiAffine::from_rect(&rect, FRAME_SIZE, FRAME_SIZE, LANDMARK_INPUT_SIZE)?;
            let crop = warp_affine(&working, &affine)?;
            let landmark_input = frame_to_tensor(&crop, PixelRange::ZeroToOne)?;
            (rect, engine.run_landmarker(landmark_input)?)
        };

        let decoded = decode_landmarks(&landmark_outputs, &self.landmark_outputs)?;
        log::debug!("pose presence {:.3}", decoded.presence);
        let landmarks = project_landmarks(&decoded.landmarks, &rect, &letterbox);
        Ok(Pose::new(landmarks, decoded.world))
    }

    pub fn score(&self, path: &Path, target: &TargetPose, angles: &[AngleKind]) -> Result<ScoreReport> {
        let pose = self.infer(path)?;
        Ok(ScoreReport::new(&pose, target, angles))
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_cache(&self) -> MutexGuard<'_, PoseCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(path: &Path) -> Result<CacheKey> {
    let not_found = |_| PoseError::ImageNotFound(path.to_path_buf());
    let absolute = fs::canonicalize(path).map_err(not_found)?;
    let modified = fs::metadata(&absolute)
        .and_then(|meta| meta.modified())
        .map_err(not_found)?;
    Ok(CacheKey {
        path: absolute,
        modified,
    })
}
