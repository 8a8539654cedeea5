//! Geometry comparison of two landmark documents: raw XY error, a linear fit
//! between the depth channels and the residual after a best-fit 2D
//! similarity transform.

use anyhow::{Result, anyhow, bail};

use crate::types::{NamedKeypoint, PoseDocument};

const REGIONS: [(&str, &[&str]); 3] = [
    (
        "upper",
        &[
            "left_shoulder",
            "right_shoulder",
            "left_elbow",
            "right_elbow",
            "left_wrist",
            "right_wrist",
            "left_eye",
            "right_eye",
            "nose",
            "left_ear",
            "right_ear",
            "mouth_left",
            "mouth_right",
        ],
    ),
    ("torso", &["left_shoulder", "right_shoulder", "left_hip", "right_hip"]),
    (
        "lower",
        &[
            "left_hip",
            "right_hip",
            "left_knee",
            "right_knee",
            "left_ankle",
            "right_ankle",
            "left_heel",
            "right_heel",
            "left_foot_index",
            "right_foot_index",
        ],
    ),
];

#[derive(Clone, Debug, PartialEq)]
pub struct KeypointError {
    pub name: String,
    pub dx: f64,
    pub dy: f64,
    pub error: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorStats {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
}

impl ErrorStats {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Some(Self {
            mean: mean(values),
            median,
            max: sorted[n - 1],
        })
    }
}

/// Least-squares `reference ≈ slope * ours + intercept` over z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthFit {
    pub slope: f64,
    pub intercept: f64,
    pub rmse: f64,
    /// `None` when either side has no variance.
    pub correlation: Option<f64>,
}

/// Scale and rotation taking our XY onto the reference in the
/// least-squares sense, with per-keypoint residuals sorted worst first.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
    pub scale: f64,
    pub rotation_deg: f64,
    pub residuals: Vec<(String, f64)>,
    pub stats: ErrorStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkDiff {
    /// Sorted by descending error.
    pub errors: Vec<KeypointError>,
    pub xy: ErrorStats,
    pub regions: Vec<(&'static str, ErrorStats)>,
    pub depth: DepthFit,
    pub alignment: Alignment,
}

/// Compares `ours` against `reference`, pairing keypoints by name. Both
/// documents must carry the same set of names.
pub fn diff_documents(ours: &PoseDocument, reference: &PoseDocument) -> Result<LandmarkDiff> {
    let pairs = pair_by_name(&ours.keypoints, &reference.keypoints)?;

    let mut errors: Vec<KeypointError> = pairs
        .iter()
        .map(|(a, b)| {
            let dx = f64::from(a.x) - f64::from(b.x);
            let dy = f64::from(a.y) - f64::from(b.y);
            KeypointError {
                name: b.name.clone(),
                dx,
                dy,
                error: dx.hypot(dy),
            }
        })
        .collect();
    let all: Vec<f64> = errors.iter().map(|e| e.error).collect();
    let xy = ErrorStats::of(&all).ok_or_else(|| anyhow!("no keypoints to compare"))?;

    let regions = REGIONS
        .iter()
        .filter_map(|(region, names)| {
            let values: Vec<f64> = errors
                .iter()
                .filter(|e| names.contains(&e.name.as_str()))
                .map(|e| e.error)
                .collect();
            ErrorStats::of(&values).map(|stats| (*region, stats))
        })
        .collect();
    errors.sort_by(|a, b| b.error.total_cmp(&a.error));

    let ours_z: Vec<f64> = pairs.iter().map(|(a, _)| f64::from(a.z)).collect();
    let ref_z: Vec<f64> = pairs.iter().map(|(_, b)| f64::from(b.z)).collect();

    Ok(LandmarkDiff {
        errors,
        xy,
        regions,
        depth: fit_depth(&ours_z, &ref_z),
        alignment: align(&pairs),
    })
}

fn pair_by_name<'a>(
    ours: &'a [NamedKeypoint],
    reference: &'a [NamedKeypoint],
) -> Result<Vec<(&'a NamedKeypoint, &'a NamedKeypoint)>> {
    if ours.len() != reference.len() {
        bail!(
            "keypoint counts differ: {} vs {} in the reference",
            ours.len(),
            reference.len()
        );
    }
    reference
        .iter()
        .map(|b| match ours.iter().find(|a| a.name == b.name) {
            Some(a) => Ok((a, b)),
            None => bail!("keypoint {} missing from the compared document", b.name),
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn fit_depth(ours: &[f64], reference: &[f64]) -> DepthFit {
    let (mo, mr) = (mean(ours), mean(reference));
    let var_o = ours.iter().map(|v| (v - mo).powi(2)).sum::<f64>();
    let var_r = reference.iter().map(|v| (v - mr).powi(2)).sum::<f64>();
    let cov = ours
        .iter()
        .zip(reference)
        .map(|(o, r)| (o - mo) * (r - mr))
        .sum::<f64>();

    let slope = if var_o > 0.0 { cov / var_o } else { 0.0 };
    let intercept = mr - slope * mo;
    let sq_err: Vec<f64> = ours
        .iter()
        .zip(reference)
        .map(|(o, r)| (slope * o + intercept - r).powi(2))
        .collect();
    DepthFit {
        slope,
        intercept,
        rmse: mean(&sq_err).sqrt(),
        correlation: (var_o > 0.0 && var_r > 0.0).then(|| cov / (var_o * var_r).sqrt()),
    }
}

// Closed-form 2D Procrustes: for centred point sets the optimal rotation is
// atan2(Σ a×b, Σ a·b) and the scale is |(Σ a·b, Σ a×b)| / Σ|a|².
fn align(pairs: &[(&NamedKeypoint, &NamedKeypoint)]) -> Alignment {
    let n = pairs.len() as f64;
    let (mut ax, mut ay, mut bx, mut by) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (a, b) in pairs {
        ax += f64::from(a.x);
        ay += f64::from(a.y);
        bx += f64::from(b.x);
        by += f64::from(b.y);
    }
    let (mu_a, mu_b) = ((ax / n, ay / n), (bx / n, by / n));

    let (mut dot, mut cross, mut norm_a) = (0.0f64, 0.0f64, 0.0f64);
    for (a, b) in pairs {
        let (px, py) = (f64::from(a.x) - mu_a.0, f64::from(a.y) - mu_a.1);
        let (qx, qy) = (f64::from(b.x) - mu_b.0, f64::from(b.y) - mu_b.1);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm_a += px * px + py * py;
    }
    let theta = cross.atan2(dot);
    let scale = if norm_a > 0.0 { dot.hypot(cross) / norm_a } else { 0.0 };
    let (sin, cos) = theta.sin_cos();

    let mut residuals: Vec<(String, f64)> = pairs
        .iter()
        .map(|(a, b)| {
            let (px, py) = (f64::from(a.x) - mu_a.0, f64::from(a.y) - mu_a.1);
            let x = scale * (cos * px - sin * py) + mu_b.0;
            let y = scale * (sin * px + cos * py) + mu_b.1;
            let res = (x - f64::from(b.x)).hypot(y - f64::from(b.y));
            (b.name.clone(), res)
        })
        .collect();
    let values: Vec<f64> = residuals.iter().map(|(_, r)| *r).collect();
    let stats = ErrorStats::of(&values).unwrap_or(ErrorStats {
        mean: 0.0,
        median: 0.0,
        max: 0.0,
    });
    residuals.sort_by(|a, b| b.1.total_cmp(&a.1));

    Alignment {
        scale,
        rotation_deg: theta.to_degrees(),
        residuals,
        stats,
    }
}
