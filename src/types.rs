use serde::{Deserialize, Serialize};

/// Tightly packed RGB8 pixels, row-major.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32) -> anyhow::Result<Self> {
        let expected = (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(3);
        if rgb.len() != expected {
            anyhow::bail!(
                "frame buffer size mismatch: got {}, expected {}",
                rgb.len(),
                expected
            );
        }
        Ok(Self { rgb, width, height })
    }

    pub fn filled(width: u32, height: u32, px: [u8; 3]) -> Self {
        let rgb = px
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { rgb, width, height }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        [self.rgb[idx], self.rgb[idx + 1], self.rgb[idx + 2]]
    }
}

pub const NUM_LANDMARKS: usize = 33;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkName {
    Nose,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl LandmarkName {
    pub const ALL: [LandmarkName; NUM_LANDMARKS] = [
        LandmarkName::Nose,
        LandmarkName::LeftEyeInner,
        LandmarkName::LeftEye,
        LandmarkName::LeftEyeOuter,
        LandmarkName::RightEyeInner,
        LandmarkName::RightEye,
        LandmarkName::RightEyeOuter,
        LandmarkName::LeftEar,
        LandmarkName::RightEar,
        LandmarkName::MouthLeft,
        LandmarkName::MouthRight,
        LandmarkName::LeftShoulder,
        LandmarkName::RightShoulder,
        LandmarkName::LeftElbow,
        LandmarkName::RightElbow,
        LandmarkName::LeftWrist,
        LandmarkName::RightWrist,
        LandmarkName::LeftPinky,
        LandmarkName::RightPinky,
        LandmarkName::LeftIndex,
        LandmarkName::RightIndex,
        LandmarkName::LeftThumb,
        LandmarkName::RightThumb,
        LandmarkName::LeftHip,
        LandmarkName::RightHip,
        LandmarkName::LeftKnee,
        LandmarkName::RightKnee,
        LandmarkName::LeftAnkle,
        LandmarkName::RightAnkle,
        LandmarkName::LeftHeel,
        LandmarkName::RightHeel,
        LandmarkName::LeftFootIndex,
        LandmarkName::RightFootIndex,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LandmarkName::Nose => "nose",
            LandmarkName::LeftEyeInner => "left_eye_inner",
            LandmarkName::LeftEye => "left_eye",
            LandmarkName::LeftEyeOuter => "left_eye_outer",
            LandmarkName::RightEyeInner => "right_eye_inner",
            LandmarkName::RightEye => "right_eye",
            LandmarkName::RightEyeOuter => "right_eye_outer",
            LandmarkName::LeftEar => "left_ear",
            LandmarkName::RightEar => "right_ear",
            LandmarkName::MouthLeft => "mouth_left",
            LandmarkName::MouthRight => "mouth_right",
            LandmarkName::LeftShoulder => "left_shoulder",
            LandmarkName::RightShoulder => "right_shoulder",
            LandmarkName::LeftElbow => "left_elbow",
            LandmarkName::RightElbow => "right_elbow",
            LandmarkName::LeftWrist => "left_wrist",
            LandmarkName::RightWrist => "right_wrist",
            LandmarkName::LeftPinky => "left_pinky",
            LandmarkName::RightPinky => "right_pinky",
            LandmarkName::LeftIndex => "left_index",
            LandmarkName::RightIndex => "right_index",
            LandmarkName::LeftThumb => "left_thumb",
            LandmarkName::RightThumb => "right_thumb",
            LandmarkName::LeftHip => "left_hip",
            LandmarkName::RightHip => "right_hip",
            LandmarkName::LeftKnee => "left_knee",
            LandmarkName::RightKnee => "right_knee",
            LandmarkName::LeftAnkle => "left_ankle",
            LandmarkName::RightAnkle => "right_ankle",
            LandmarkName::LeftHeel => "left_heel",
            LandmarkName::RightHeel => "right_heel",
            LandmarkName::LeftFootIndex => "left_foot_index",
            LandmarkName::RightFootIndex => "right_foot_index",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|n| n.as_str() == name)
    }

    /// The same anatomical point on the opposite side; midline points map to themselves.
    pub fn mirrored(self) -> Self {
        let name = self.as_str();
        let swapped = if let Some(rest) = name.strip_prefix("left_") {
            format!("right_{rest}")
        } else if let Some(rest) = name.strip_prefix("right_") {
            format!("left_{rest}")
        } else {
            return self;
        };
        Self::from_name(&swapped).unwrap_or(self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub confidence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }
}

/// Either empty (nobody found) or exactly [`NUM_LANDMARKS`] landmarks in
/// [`LandmarkName::ALL`] order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    landmarks: Vec<Landmark>,
    world: Vec<Landmark>,
}

impl Pose {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(landmarks: [Landmark; NUM_LANDMARKS], world: [Landmark; NUM_LANDMARKS]) -> Self {
        Self {
            landmarks: landmarks.to_vec(),
            world: world.to_vec(),
        }
    }

    /// Builds a pose from named points in any order; names that never appear
    /// keep zero confidence.
    pub fn from_named<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Landmark)>,
    {
        let mut landmarks = [Landmark::default(); NUM_LANDMARKS];
        for (name, lm) in points {
            match LandmarkName::from_name(name) {
                Some(n) => landmarks[n.index()] = lm,
                None => log::debug!("ignoring unknown landmark name {name:?}"),
            }
        }
        Self::new(landmarks, [Landmark::default(); NUM_LANDMARKS])
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn world_landmarks(&self) -> &[Landmark] {
        &self.world
    }

    pub fn get(&self, name: LandmarkName) -> Option<&Landmark> {
        self.landmarks.get(name.index())
    }

    pub fn named(&self) -> impl Iterator<Item = (LandmarkName, &Landmark)> {
        LandmarkName::ALL.iter().copied().zip(self.landmarks.iter())
    }

    /// Swaps every `left_*` landmark with its `right_*` counterpart.
    pub fn mirrored(&self) -> Self {
        let swap = |points: &[Landmark]| -> Vec<Landmark> {
            if points.is_empty() {
                return Vec::new();
            }
            LandmarkName::ALL
                .iter()
                .map(|name| points[name.mirrored().index()])
                .collect()
        };
        Self {
            landmarks: swap(&self.landmarks),
            world: swap(&self.world),
        }
    }
}

/// Best detector candidate, normalized to the working frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub bbox: [f32; 4],
    pub mid_hip: (f32, f32),
    pub scale_point: (f32, f32),
}

/// Oriented rectangle, normalized to the working frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedRect {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedKeypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default)]
    pub score: f32,
}

/// On-disk landmark document, `{"keypoints": [...], "keypoints3D": [...]}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoseDocument {
    pub keypoints: Vec<NamedKeypoint>,
    #[serde(rename = "keypoints3D", default)]
    pub keypoints_3d: Vec<NamedKeypoint>,
}

impl PoseDocument {
    pub fn from_pose(pose: &Pose) -> Self {
        let to_named = |points: &[Landmark]| -> Vec<NamedKeypoint> {
            LandmarkName::ALL
                .iter()
                .zip(points)
                .map(|(name, lm)| NamedKeypoint {
                    name: name.as_str().to_string(),
                    x: lm.x,
                    y: lm.y,
                    z: lm.z,
                    score: lm.confidence,
                })
                .collect()
        };
        Self {
            keypoints: to_named(pose.landmarks()),
            keypoints_3d: to_named(pose.world_landmarks()),
        }
    }

    pub fn to_pose(&self) -> Pose {
        if self.keypoints.is_empty() {
            return Pose::empty();
        }
        Pose::from_named(self.keypoints.iter().map(|kp| {
            (
                kp.name.as_str(),
                Landmark::new(kp.x, kp.y, kp.z, kp.score),
            )
        }))
    }
}
