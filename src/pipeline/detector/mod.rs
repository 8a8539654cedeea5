pub mod anchors;

use std::cmp::Ordering;

use anyhow::{Result, anyhow};

pub use anchors::{Anchor, AnchorOptions, NUM_POSE_ANCHORS, generate_anchors};

use super::common::{DETECTOR_INPUT_SIZE, sigmoid};
use super::engine::RawTensor;
use crate::types::Detection;

/// box center, box size, mid-hip, scale point
const REQUIRED_POINTS: usize = 4;

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
        }
    }
}

/// Output names to bind explicitly; unset names fall back to
/// smallest-tensor-is-scores, largest-tensor-is-boxes.
#[derive(Clone, Debug, Default)]
pub struct DetectorOutputContract {
    pub boxes: Option<String>,
    pub scores: Option<String>,
}

pub fn select_detector_outputs<'a>(
    outputs: &'a [RawTensor],
    contract: &DetectorOutputContract,
) -> Result<(&'a RawTensor, &'a RawTensor)> {
    let by_name = |name: &Option<String>| {
        name.as_deref()
            .and_then(|n| outputs.iter().find(|t| t.name == n))
    };
    if let (Some(boxes), Some(scores)) = (by_name(&contract.boxes), by_name(&contract.scores)) {
        return Ok((boxes, scores));
    }
    if contract.boxes.is_some() || contract.scores.is_some() {
        log::debug!("detector output contract did not match, classifying by size");
    }

    if outputs.len() < 2 {
        return Err(anyhow!(
            "pose detector returned {} outputs, expected at least 2",
            outputs.len()
        ));
    }
    let boxes = outputs
        .iter()
        .max_by_key(|t| t.len())
        .ok_or_else(|| anyhow!("pose detector returned no outputs"))?;
    let scores = outputs
        .iter()
        .min_by_key(|t| t.len())
        .ok_or_else(|| anyhow!("pose detector returned no outputs"))?;
    Ok((boxes, scores))
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionCandidate {
    pub score: f32,
    pub bbox: [f32; 4],
    pub mid_hip: (f32, f32),
    pub scale_point: (f32, f32),
}

impl From<&DetectionCandidate> for Detection {
    fn from(c: &DetectionCandidate) -> Self {
        Detection {
            score: c.score,
            bbox: c.bbox,
            mid_hip: c.mid_hip,
            scale_point: c.scale_point,
        }
    }
}

/// Decodes every anchor whose score clears the threshold.
pub fn decode_detections(
    boxes: &RawTensor,
    scores: &RawTensor,
    anchors: &[Anchor],
    cfg: &DetectorConfig,
) -> Result<Vec<DetectionCandidate>> {
    let feature_dim = *boxes
        .shape
        .last()
        .ok_or_else(|| anyhow!("missing feature dimension in detector box shape"))?;
    if feature_dim < REQUIRED_POINTS * 2 || feature_dim % 2 != 0 {
        return Err(anyhow!(
            "unexpected detector box shape {:?}, need [.., anchors, 2 * points]",
            boxes.shape
        ));
    }
    let box_count = boxes.len() / feature_dim;
    if box_count != anchors.len() || scores.len() != anchors.len() {
        return Err(anyhow!(
            "detector outputs cover {box_count} boxes and {} scores, expected {} anchors",
            scores.len(),
            anchors.len()
        ));
    }

    let input = DETECTOR_INPUT_SIZE as f32;
    let mut candidates = Vec::new();
    for (anchor_idx, (anchor, raw_score)) in anchors.iter().zip(&scores.data).enumerate() {
        let score = sigmoid(*raw_score);
        // also rejects NaN
        if !(score > cfg.score_threshold) {
            continue;
        }

        let row = &boxes.data[anchor_idx * feature_dim..(anchor_idx + 1) * feature_dim];
        let point = |i: usize, offset: bool| -> (f32, f32) {
            let x = row[i * 2] / input;
            let y = row[i * 2 + 1] / input;
            if offset {
                (x + anchor.x_center, y + anchor.y_center)
            } else {
                (x, y)
            }
        };

        let (cx, cy) = point(0, true);
        let (w, h) = point(1, false);
        candidates.push(DetectionCandidate {
            score,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            mid_hip: point(2, true),
            scale_point: point(3, true),
        });
    }
    Ok(candidates)
}

/// Greedy IoU suppression; returns kept indices in descending score order.
pub fn nms(candidates: &[DetectionCandidate], threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    'outer: for &idx in &order {
        for &k in &keep {
            if iou(&candidates[idx].bbox, &candidates[k].bbox) > threshold {
                continue 'outer;
            }
        }
        keep.push(idx);
    }
    keep
}

/// Single-person policy: only the top survivor is used.
pub fn best_detection(
    boxes: &RawTensor,
    scores: &RawTensor,
    anchors: &[Anchor],
    cfg: &DetectorConfig,
) -> Result<Option<Detection>> {
    let candidates = decode_detections(boxes, scores, anchors, cfg)?;
    let kept = nms(&candidates, cfg.nms_threshold);
    if kept.len() > 1 {
        log::debug!("{} people after nms, keeping the top score", kept.len());
    }
    Ok(kept
        .first()
        .and_then(|&idx| candidates.get(idx))
        .map(Detection::from))
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter + 1e-8)
}
