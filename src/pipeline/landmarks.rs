use anyhow::{Result, anyhow, bail};

use super::common::{LANDMARK_INPUT_SIZE, sigmoid};
use super::engine::RawTensor;
use crate::types::{Landmark, NUM_LANDMARKS};

const HEATMAP_KERNEL_SIZE: usize = 7;
const HEATMAP_MIN_CONFIDENCE: f32 = 0.0;
const HEATMAP_MIN_PIXELS: usize = 1024;
/// Raw logit assumed when the model has no pose-presence output.
const DEFAULT_PRESENCE_LOGIT: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorRole {
    ImageLandmarks,
    WorldLandmarks,
    Presence,
    Heatmap,
}

/// Output names to bind explicitly. Tensors not named here are classified
/// by element count and shape.
#[derive(Clone, Debug, Default)]
pub struct LandmarkOutputContract {
    pub image_landmarks: Option<String>,
    pub world_landmarks: Option<String>,
    pub presence: Option<String>,
    pub heatmap: Option<String>,
}

impl LandmarkOutputContract {
    fn role_of(&self, name: &str) -> Option<TensorRole> {
        let is = |slot: &Option<String>| slot.as_deref() == Some(name);
        if is(&self.image_landmarks) {
            Some(TensorRole::ImageLandmarks)
        } else if is(&self.world_landmarks) {
            Some(TensorRole::WorldLandmarks)
        } else if is(&self.presence) {
            Some(TensorRole::Presence)
        } else if is(&self.heatmap) {
            Some(TensorRole::Heatmap)
        } else {
            None
        }
    }
}

fn role_from_shape(tensor: &RawTensor) -> Option<TensorRole> {
    if heatmap_dims(&tensor.shape).is_some() {
        return Some(TensorRole::Heatmap);
    }
    match tensor.len() {
        195 | 165 | 99 => Some(TensorRole::ImageLandmarks),
        117 => Some(TensorRole::WorldLandmarks),
        1 => Some(TensorRole::Presence),
        _ => None,
    }
}

/// `(H, W, C)` for `[1, H, W, C]` or `[H, W, C]` with 33 or 39 channels.
fn heatmap_dims(shape: &[usize]) -> Option<(usize, usize, usize)> {
    let (h, w, c) = match shape {
        [1, h, w, c] | [h, w, c] => (*h, *w, *c),
        _ => return None,
    };
    ((c == 33 || c == 39) && h * w >= HEATMAP_MIN_PIXELS).then_some((h, w, c))
}

/// HWC heatmap logits.
#[derive(Clone, Debug)]
pub struct Heatmap {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Heatmap {
    fn from_tensor(tensor: &RawTensor) -> Result<Self> {
        let (height, width, channels) = heatmap_dims(&tensor.shape)
            .ok_or_else(|| anyhow!("tensor {} with shape {:?} is not a heatmap", tensor.name, tensor.shape))?;
        Ok(Self {
            height,
            width,
            channels,
            data: tensor.data.clone(),
        })
    }

    fn logit(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + channel]
    }
}

/// Landmark-model outputs sorted by role, before activation.
#[derive(Clone, Debug)]
pub struct LandmarkOutputs {
    pub image: Vec<[f32; 3]>,
    pub keypoint_logits: Option<Vec<f32>>,
    pub world: Option<Vec<[f32; 3]>>,
    pub presence_logit: Option<f32>,
    pub heatmap: Option<Heatmap>,
}

pub fn classify_outputs(outputs: &[RawTensor], contract: &LandmarkOutputContract) -> Result<LandmarkOutputs> {
    let mut image: Option<&RawTensor> = None;
    let mut world = None;
    let mut presence = None;
    let mut heatmap = None;

    for tensor in outputs {
        let Some(role) = contract
            .role_of(&tensor.name)
            .or_else(|| role_from_shape(tensor))
        else {
            log::debug!(
                "ignoring landmark output {} with shape {:?}",
                tensor.name,
                tensor.shape
            );
            continue;
        };
        match role {
            // 39x5 beats 33x5 beats 33x3
            TensorRole::ImageLandmarks => {
                let rank = |t: &RawTensor| match t.len() {
                    195 => 3,
                    165 => 2,
                    99 => 1,
                    _ => 0,
                };
                if image.is_none_or(|current| rank(tensor) > rank(current)) {
                    image = Some(tensor);
                }
            }
            TensorRole::WorldLandmarks => world = Some(tensor),
            TensorRole::Presence => presence = Some(tensor),
            TensorRole::Heatmap => heatmap = Some(tensor),
        }
    }

    let image = image.ok_or_else(|| anyhow!("landmark model returned no image landmarks"))?;
    let cols = match image.len() {
        195 | 165 => 5,
        99 => 3,
        other => bail!(
            "image landmark tensor {} has {other} elements, expected 195, 165 or 99",
            image.name
        ),
    };
    let table = |t: &RawTensor, cols: usize| -> Vec<[f32; 3]> {
        t.data
            .chunks_exact(cols)
            .take(NUM_LANDMARKS)
            .map(|row| [row[0], row[1], row[2]])
            .collect()
    };

    let world = match world {
        Some(t) if t.len() >= NUM_LANDMARKS * 3 => Some(table(t, 3)),
        Some(t) => bail!(
            "world landmark tensor {} has {} elements, expected at least 99",
            t.name,
            t.len()
        ),
        None => None,
    };

    Ok(LandmarkOutputs {
        image: table(image, cols),
        keypoint_logits: (cols == 5).then(|| {
            image
                .data
                .chunks_exact(cols)
                .take(NUM_LANDMARKS)
                .map(|row| row[4])
                .collect()
        }),
        world,
        presence_logit: presence.and_then(|t| t.data.first().copied()),
        heatmap: heatmap.map(Heatmap::from_tensor).transpose()?,
    })
}

/// Pulls each in-bounds landmark to the confidence-weighted centroid of a
/// `kernel_size` window of the heatmap around it. `z` is left untouched.
pub fn refine_from_heatmap(landmarks: &mut [[f32; 3]], heatmap: &Heatmap, kernel_size: usize, min_confidence: f32) {
    let (h, w) = (heatmap.height, heatmap.width);
    if h == 0 || w == 0 {
        return;
    }
    let half = kernel_size / 2;
    let count = landmarks.len().min(heatmap.channels).min(NUM_LANDMARKS);

    for (channel, point) in landmarks.iter_mut().enumerate().take(count) {
        let (x, y) = (point[0], point[1]);
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            continue;
        }
        let cx = (x * w as f32) as usize;
        let cy = (y * h as f32) as usize;
        if cx >= w || cy >= h {
            continue;
        }

        let (x0, x1) = (cx.saturating_sub(half), (cx + half).min(w - 1));
        let (y0, y1) = (cy.saturating_sub(half), (cy + half).min(h - 1));
        let mut sum = 0.0f32;
        let mut max_conf = 0.0f32;
        let mut weighted_x = 0.0f32;
        let mut weighted_y = 0.0f32;
        for py in y0..=y1 {
            for px in x0..=x1 {
                let conf = sigmoid(heatmap.logit(px, py, channel));
                sum += conf;
                max_conf = max_conf.max(conf);
                weighted_x += conf * px as f32;
                weighted_y += conf * py as f32;
            }
        }
        if sum <= 0.0 || max_conf < min_confidence {
            continue;
        }
        point[0] = weighted_x / sum / w as f32;
        point[1] = weighted_y / sum / h as f32;
    }
}

/// Landmarks in ROI-normalized units with activated confidences.
#[derive(Clone, Debug)]
pub struct DecodedLandmarks {
    pub landmarks: [Landmark; NUM_LANDMARKS],
    pub world: [Landmark; NUM_LANDMARKS],
    pub presence: f32,
}

pub fn decode_landmarks(outputs: &[RawTensor], contract: &LandmarkOutputContract) -> Result<DecodedLandmarks> {
    let LandmarkOutputs {
        mut image,
        keypoint_logits,
        world,
        presence_logit,
        heatmap,
    } = classify_outputs(outputs, contract)?;

    let max_xy = image
        .iter()
        .flat_map(|p| [p[0], p[1]])
        .fold(f32::MIN, f32::max);
    if max_xy > 1.5 {
        let input = LANDMARK_INPUT_SIZE as f32;
        for p in image.iter_mut() {
            p.iter_mut().for_each(|v| *v /= input);
        }
    }

    match heatmap.as_ref() {
        Some(hm) => refine_from_heatmap(&mut image, hm, HEATMAP_KERNEL_SIZE, HEATMAP_MIN_CONFIDENCE),
        None => log::debug!("landmark model has no heatmap output, skipping refinement"),
    }

    let presence = sigmoid(presence_logit.unwrap_or(DEFAULT_PRESENCE_LOGIT));
    let scores: Vec<f32> = match keypoint_logits {
        Some(logits) => logits.into_iter().map(sigmoid).collect(),
        None => vec![presence; NUM_LANDMARKS],
    };

    let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
    for (i, (p, score)) in image.iter().zip(&scores).enumerate() {
        landmarks[i] = Landmark::new(p[0], p[1], p[2], *score);
    }
    let mut world_landmarks = [Landmark::default(); NUM_LANDMARKS];
    if let Some(world) = world {
        for (i, (p, score)) in world.iter().zip(&scores).enumerate() {
            world_landmarks[i] = Landmark::new(p[0], p[1], p[2], *score);
        }
    }

    Ok(DecodedLandmarks {
        landmarks,
        world: world_landmarks,
        presence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_tensor(rows: usize, cols: usize, fill: impl Fn(usize) -> [f32; 5]) -> RawTensor {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            data.extend_from_slice(&fill(r)[..cols]);
        }
        RawTensor::new("landmarks", vec![1, rows * cols], data)
    }

    fn flat_heatmap(size: usize, logit: f32) -> Heatmap {
        Heatmap {
            height: size,
            width: size,
            channels: 33,
            data: vec![logit; size * size * 33],
        }
    }

    #[test]
    fn full_layout_with_world_and_presence() {
        let outputs = vec![
            image_tensor(39, 5, |r| [r as f32 / 100.0, 0.5, 0.1, 0.0, 0.0]),
            RawTensor::new("presence", vec![1, 1], vec![0.0]),
            RawTensor::new("world", vec![1, 117], (0..117).map(|v| v as f32).collect()),
        ];
        let decoded = decode_landmarks(&outputs, &LandmarkOutputContract::default()).unwrap();

        assert!((decoded.landmarks[32].x - 0.32).abs() < 1e-6);
        assert!(decoded.landmarks.iter().all(|l| (l.confidence - 0.5).abs() < 1e-6));
        assert_eq!(decoded.world[1].x, 3.0);
        assert_eq!(decoded.world[32].z, 98.0);
        assert_eq!(decoded.presence, 0.5);
    }

    #[test]
    fn pixel_units_are_normalized() {
        let outputs = vec![image_tensor(33, 5, |_| [128.0, 64.0, 12.8, 0.0, 2.0])];
        let decoded = decode_landmarks(&outputs, &LandmarkOutputContract::default()).unwrap();
        let lm = decoded.landmarks[0];
        assert!((lm.x - 0.5).abs() < 1e-6);
        assert!((lm.y - 0.25).abs() < 1e-6);
        assert!((lm.z - 0.05).abs() < 1e-6);
        assert!((lm.confidence - sigmoid(2.0)).abs() < 1e-6);
    }

    #[test]
    fn scores_fall_back_to_presence_and_world_to_zero() {
        let outputs = vec![
            image_tensor(33, 3, |_| [0.2, 0.3, 0.0, 0.0, 0.0]),
            RawTensor::new("presence", vec![1], vec![3.0]),
        ];
        let decoded = decode_landmarks(&outputs, &LandmarkOutputContract::default()).unwrap();
        assert!(decoded.landmarks.iter().all(|l| (l.confidence - sigmoid(3.0)).abs() < 1e-6));
        assert!(decoded.world.iter().all(|l| *l == Landmark::new(0.0, 0.0, 0.0, 0.0)));
    }

    #[test]
    fn missing_presence_uses_default_logit() {
        let outputs = vec![image_tensor(33, 3, |_| [0.2, 0.3, 0.0, 0.0, 0.0])];
        let decoded = decode_landmarks(&outputs, &LandmarkOutputContract::default()).unwrap();
        assert!((decoded.presence - sigmoid(1.0)).abs() < 1e-6);
    }

    #[test]
    fn missing_image_landmarks_is_an_error() {
        let outputs = vec![RawTensor::new("presence", vec![1], vec![3.0])];
        assert!(decode_landmarks(&outputs, &LandmarkOutputContract::default()).is_err());
    }

    #[test]
    fn contract_names_override_counts() {
        // a 99-element tensor explicitly bound as world landmarks
        let outputs = vec![
            image_tensor(39, 5, |_| [0.4, 0.4, 0.0, 0.0, 0.0]),
            RawTensor::new("Identity_4", vec![1, 99], vec![7.0; 99]),
        ];
        let contract = LandmarkOutputContract {
            world_landmarks: Some("Identity_4".into()),
            ..LandmarkOutputContract::default()
        };
        let decoded = decode_landmarks(&outputs, &contract).unwrap();
        assert_eq!(decoded.world[0].x, 7.0);
        assert!((decoded.landmarks[0].x - 0.4).abs() < 1e-6);
    }

    #[test]
    fn heatmap_is_recognized_by_shape() {
        let hm = RawTensor::new("heatmap", vec![1, 64, 64, 39], vec![0.0; 64 * 64 * 39]);
        let small = RawTensor::new("mask", vec![1, 16, 16, 33], vec![0.0; 16 * 16 * 33]);
        let mask = RawTensor::new("seg", vec![1, 256, 256, 1], vec![0.0; 256 * 256]);
        assert_eq!(role_from_shape(&hm), Some(TensorRole::Heatmap));
        assert_eq!(role_from_shape(&small), None);
        assert_eq!(role_from_shape(&mask), None);
    }

    #[test]
    fn refinement_moves_to_peak() {
        let mut hm = flat_heatmap(32, -80.0);
        let peak = (10usize, 20usize);
        hm.data[(peak.1 * 32 + peak.0) * 33] = 80.0;

        let mut points = vec![[0.0f32; 3]; 33];
        points[0] = [9.2 / 32.0, 19.5 / 32.0, 0.7];
        points[1] = [1.2, 0.5, 0.3];
        refine_from_heatmap(&mut points, &hm, 7, 0.0);

        assert!((points[0][0] - 10.0 / 32.0).abs() < 1e-4);
        assert!((points[0][1] - 20.0 / 32.0).abs() < 1e-4);
        assert_eq!(points[0][2], 0.7);
        assert_eq!(points[1], [1.2, 0.5, 0.3]);
    }

    #[test]
    fn decode_refines_through_the_heatmap_output() {
        let mut heatmap = vec![-80.0f32; 64 * 64 * 39];
        heatmap[(21 * 64 + 20) * 39] = 80.0;
        let outputs = vec![
            image_tensor(39, 5, |_| [0.33, 0.34, 0.2, 0.0, 4.0]),
            RawTensor::new("heatmap", vec![1, 64, 64, 39], heatmap),
            RawTensor::new("segmentation", vec![1, 256, 256, 1], vec![0.0; 256 * 256]),
        ];
        let decoded = decode_landmarks(&outputs, &LandmarkOutputContract::default()).unwrap();

        let nose = decoded.landmarks[0];
        assert!((nose.x - 20.0 / 64.0).abs() < 1e-4, "{}", nose.x);
        assert!((nose.y - 21.0 / 64.0).abs() < 1e-4, "{}", nose.y);
        assert!((nose.z - 0.2).abs() < 1e-6);
        assert!((nose.confidence - sigmoid(4.0)).abs() < 1e-6);
    }

    #[test]
    fn flat_heatmap_pulls_to_window_centre() {
        let hm = flat_heatmap(32, 0.0);
        let mut points = vec![[0.51f32, 0.51, 0.0]; 33];
        refine_from_heatmap(&mut points, &hm, 7, 0.0);
        assert!((points[0][0] - 0.5).abs() < 1e-6);

        // window clipped at the border
        let mut points = vec![[0.0f32, 0.0, 0.0]; 33];
        refine_from_heatmap(&mut points, &hm, 7, 0.0);
        assert!((points[5][0] - 1.5 / 32.0).abs() < 1e-6);
    }
}
