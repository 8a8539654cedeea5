//! Joint-angle pose comparison.
//!
//! Eight interior angles (elbows, shoulders, hips, knees) are measured on
//! each pose and compared slot by slot. A lateral flip of the observed pose
//! is also tried and the better of the two scores wins.

use crate::catalog::TargetPose;
use crate::types::{Landmark, LandmarkName, Pose};

/// Landmarks below this confidence leave their angles undefined.
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AngleKind {
    LeftElbow,
    LeftShoulder,
    LeftHip,
    LeftKnee,
    RightElbow,
    RightShoulder,
    RightHip,
    RightKnee,
}

impl AngleKind {
    pub const ALL: [AngleKind; 8] = [
        AngleKind::LeftElbow,
        AngleKind::LeftShoulder,
        AngleKind::LeftHip,
        AngleKind::LeftKnee,
        AngleKind::RightElbow,
        AngleKind::RightShoulder,
        AngleKind::RightHip,
        AngleKind::RightKnee,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AngleKind::LeftElbow => "leftElbowAngle",
            AngleKind::LeftShoulder => "leftShoulderAngle",
            AngleKind::LeftHip => "leftHipAngle",
            AngleKind::LeftKnee => "leftKneeAngle",
            AngleKind::RightElbow => "rightElbowAngle",
            AngleKind::RightShoulder => "rightShoulderAngle",
            AngleKind::RightHip => "rightHipAngle",
            AngleKind::RightKnee => "rightKneeAngle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }

    /// `(a, vertex, c)`; the angle is measured at the vertex.
    pub fn triple(self) -> (LandmarkName, LandmarkName, LandmarkName) {
        use LandmarkName::*;
        match self {
            AngleKind::LeftElbow => (LeftShoulder, LeftElbow, LeftWrist),
            AngleKind::LeftShoulder => (LeftElbow, LeftShoulder, LeftHip),
            AngleKind::LeftHip => (LeftShoulder, LeftHip, LeftKnee),
            AngleKind::LeftKnee => (LeftHip, LeftKnee, LeftAnkle),
            AngleKind::RightElbow => (RightShoulder, RightElbow, RightWrist),
            AngleKind::RightShoulder => (RightElbow, RightShoulder, RightHip),
            AngleKind::RightHip => (RightShoulder, RightHip, RightKnee),
            AngleKind::RightKnee => (RightHip, RightKnee, RightAnkle),
        }
    }

    pub fn mirrored(self) -> Self {
        Self::ALL[(self.index() + 4) % 8]
    }
}

/// Resolves requested angle names in canonical order. `None` or an empty
/// list selects all eight; unknown names are dropped, so a list of only
/// unknown names resolves to nothing.
pub fn resolve_selection<S: AsRef<str>>(names: Option<&[S]>) -> Vec<AngleKind> {
    let names = match names {
        Some(names) if !names.is_empty() => names,
        _ => return AngleKind::ALL.to_vec(),
    };
    for name in names {
        if AngleKind::from_name(name.as_ref()).is_none() {
            log::debug!("ignoring unknown angle {:?}", name.as_ref());
        }
    }
    AngleKind::ALL
        .iter()
        .copied()
        .filter(|k| names.iter().any(|n| n.as_ref() == k.name()))
        .collect()
}

/// Comma-separated angle names, blank entries skipped.
pub fn parse_angle_list(arg: &str) -> Vec<AngleKind> {
    let names: Vec<&str> = arg
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    resolve_selection(Some(names.as_slice()))
}

/// Interior angle at `b` in degrees, by the law of cosines.
pub fn calc_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> Option<f32> {
    let dist = |p: &Landmark, q: &Landmark| (p.x - q.x).hypot(p.y - q.y);
    let ab = dist(a, b);
    let bc = dist(b, c);
    let ac = dist(a, c);
    if ab == 0.0 || bc == 0.0 {
        return None;
    }
    let cos = ((ab * ab + bc * bc - ac * ac) / (2.0 * ab * bc)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

fn confident_angle(pose: &Pose, kind: AngleKind) -> Option<f32> {
    let (a, b, c) = kind.triple();
    let (a, b, c) = (pose.get(a)?, pose.get(b)?, pose.get(c)?);
    if [a, b, c].iter().any(|lm| lm.confidence < CONFIDENCE_THRESHOLD) {
        return None;
    }
    calc_angle(a, b, c)
}

/// All eight angles in [`AngleKind::ALL`] order; `None` where undefined.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JointAngles(pub [Option<f32>; 8]);

impl JointAngles {
    pub fn from_pose(pose: &Pose) -> Self {
        Self(AngleKind::ALL.map(|kind| confident_angle(pose, kind)))
    }

    pub fn get(&self, kind: AngleKind) -> Option<f32> {
        self.0[kind.index()]
    }

    /// Angles of the left/right-swapped pose.
    pub fn mirrored(&self) -> Self {
        Self(AngleKind::ALL.map(|kind| self.get(kind.mirrored())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (AngleKind, Option<f32>)> + '_ {
        AngleKind::ALL.iter().map(|&k| (k, self.get(k)))
    }
}

/// Similarity in [0, 1] of `origin` to `target` over `selected`.
///
/// Differences are summed where both angles are defined and averaged over
/// every selected slot. Zero when nothing is selected or no selected origin
/// angle is defined.
pub fn directional_similarity(origin: &JointAngles, target: &JointAngles, selected: &[AngleKind]) -> f32 {
    if selected.iter().all(|&k| origin.get(k).is_none()) {
        return 0.0;
    }
    let total_diff: f32 = selected
        .iter()
        .filter_map(|&k| Some((origin.get(k)? - target.get(k)?).abs()))
        .sum();
    let avg_diff = total_diff / selected.len() as f32;
    (1.0 - avg_diff / 180.0).max(0.0)
}

/// Squared directional similarity as a percentage, without trying the mirror.
pub fn directional_percent(origin: &JointAngles, target: &JointAngles, selected: &[AngleKind]) -> f32 {
    let similarity = directional_similarity(origin, target, selected);
    similarity * similarity * 100.0
}

/// Percentage in [0, 100], taking the better of the pose as seen and its
/// mirror image.
pub fn angles_similarity_percent(origin: &JointAngles, target: &JointAngles, selected: &[AngleKind]) -> f32 {
    let direct = directional_percent(origin, target, selected);
    let mirrored = directional_percent(&origin.mirrored(), target, selected);
    direct.max(mirrored)
}

pub fn similarity_percent(pose: &Pose, target: &TargetPose, selected: &[AngleKind]) -> f32 {
    if pose.is_empty() {
        return 0.0;
    }
    angles_similarity_percent(&JointAngles::from_pose(pose), &target.angles, selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(x: f32, y: f32) -> Landmark {
        Landmark::new(x, y, 0.0, 1.0)
    }

    /// Left arm with the elbow bent by `elbow_deg`, everything else absent.
    fn left_arm(elbow_deg: f32) -> Pose {
        let rad = elbow_deg.to_radians();
        Pose::from_named([
            ("left_shoulder", lm(100.0, 0.0)),
            ("left_elbow", lm(0.0, 0.0)),
            ("left_wrist", lm(50.0 * rad.cos(), 50.0 * rad.sin())),
        ])
    }

    fn full_body() -> Pose {
        Pose::from_named([
            ("left_shoulder", lm(120.0, 100.0)),
            ("right_shoulder", lm(80.0, 100.0)),
            ("left_elbow", lm(150.0, 130.0)),
            ("right_elbow", lm(40.0, 90.0)),
            ("left_wrist", lm(160.0, 170.0)),
            ("right_wrist", lm(20.0, 50.0)),
            ("left_hip", lm(115.0, 200.0)),
            ("right_hip", lm(85.0, 200.0)),
            ("left_knee", lm(130.0, 260.0)),
            ("right_knee", lm(60.0, 250.0)),
            ("left_ankle", lm(125.0, 320.0)),
            ("right_ankle", lm(70.0, 310.0)),
        ])
    }

    fn target(pose: &Pose) -> TargetPose {
        TargetPose {
            name: "t".into(),
            path: "t_landmarks.json".into(),
            angles: JointAngles::from_pose(pose),
        }
    }

    #[test]
    fn right_angle_matches_itself() {
        let pose = left_arm(90.0);
        let angles = JointAngles::from_pose(&pose);
        assert!((angles.get(AngleKind::LeftElbow).unwrap() - 90.0).abs() < 1e-3);

        let pct = similarity_percent(&pose, &target(&pose), &[AngleKind::LeftElbow]);
        assert!((pct - 100.0).abs() < 1e-4);
    }

    #[test]
    fn ninety_against_zero_is_a_quarter() {
        let origin = left_arm(90.0);
        let flat = Pose::from_named([
            ("left_shoulder", lm(100.0, 0.0)),
            ("left_elbow", lm(0.0, 0.0)),
            ("left_wrist", lm(50.0, 0.0)),
        ]);
        let t = target(&flat);
        assert_eq!(t.angles.get(AngleKind::LeftElbow), Some(0.0));

        let pct = similarity_percent(&origin, &t, &[AngleKind::LeftElbow]);
        assert!((pct - 25.0).abs() < 1e-3, "{pct}");
    }

    #[test]
    fn self_similarity_is_full_for_any_subset() {
        let pose = full_body();
        let t = target(&pose);
        for kind in AngleKind::ALL {
            assert!((similarity_percent(&pose, &t, &[kind]) - 100.0).abs() < 1e-4);
        }
        assert!((similarity_percent(&pose, &t, &AngleKind::ALL) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn low_confidence_scores_zero() {
        let shaky = Pose::from_named(
            full_body()
                .named()
                .map(|(name, l)| (name.as_str(), Landmark { confidence: 0.2, ..*l }))
                .collect::<Vec<_>>(),
        );
        assert_eq!(JointAngles::from_pose(&shaky), JointAngles::default());
        let t = target(&full_body());
        assert_eq!(similarity_percent(&shaky, &t, &AngleKind::ALL), 0.0);
        assert_eq!(similarity_percent(&Pose::empty(), &t, &AngleKind::ALL), 0.0);
    }

    #[test]
    fn divides_by_selected_slots_not_defined_pairs() {
        // only the left elbow is defined on both sides
        let origin = JointAngles::from_pose(&left_arm(90.0));
        let target = JointAngles::from_pose(&left_arm(0.0));
        let sim = directional_similarity(&origin, &target, &AngleKind::ALL);
        assert!((sim - (1.0 - 90.0 / 8.0 / 180.0)).abs() < 1e-5);
    }

    #[test]
    fn nothing_selected_scores_zero() {
        let pose = full_body();
        assert_eq!(similarity_percent(&pose, &target(&pose), &[]), 0.0);
    }

    #[test]
    fn mirror_invariance() {
        let pose = full_body();
        let other = left_arm(45.0);
        let t = target(&other);
        let t_mirror = target(&other.mirrored());

        let a = similarity_percent(&pose, &t, &AngleKind::ALL);
        let b = similarity_percent(&pose.mirrored(), &t_mirror, &AngleKind::ALL);
        assert!((a - b).abs() < 1e-4);

        let origin = JointAngles::from_pose(&pose);
        let direct = directional_percent(&origin, &t.angles, &AngleKind::ALL);
        let flipped = directional_percent(
            &JointAngles::from_pose(&pose.mirrored()),
            &t.angles,
            &AngleKind::ALL,
        );
        assert!(a >= direct && a >= flipped);
    }

    #[test]
    fn slot_mirror_matches_pose_mirror() {
        let pose = full_body();
        assert_eq!(
            JointAngles::from_pose(&pose).mirrored(),
            JointAngles::from_pose(&pose.mirrored())
        );
    }

    #[test]
    fn mirrored_target_recovers_full_score() {
        let pose = full_body();
        let t = target(&pose.mirrored());
        assert!((similarity_percent(&pose, &t, &AngleKind::ALL) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn directional_percent_does_not_try_the_mirror() {
        let origin = JointAngles([Some(90.0), None, None, None, Some(0.0), None, None, None]);
        let swapped = origin.mirrored();
        let selected = [AngleKind::LeftElbow, AngleKind::RightElbow];

        // |90-0| + |0-90| over two slots: avg 90, sim 0.5
        assert!((directional_percent(&origin, &swapped, &selected) - 25.0).abs() < 1e-4);
        assert!((angles_similarity_percent(&origin, &swapped, &selected) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn selection_resolution() {
        assert_eq!(resolve_selection::<&str>(None), AngleKind::ALL.to_vec());
        assert_eq!(resolve_selection::<&str>(Some(&[][..])), AngleKind::ALL.to_vec());
        assert_eq!(
            resolve_selection(Some(&["rightKneeAngle", "bogus", "leftElbowAngle"][..])),
            vec![AngleKind::LeftElbow, AngleKind::RightKnee]
        );
        assert!(resolve_selection(Some(&["bogus"][..])).is_empty());
        assert_eq!(parse_angle_list(" , "), AngleKind::ALL.to_vec());
        assert_eq!(parse_angle_list("leftHipAngle, leftHipAngle"), vec![AngleKind::LeftHip]);
    }

    #[test]
    fn degenerate_segment_is_undefined() {
        assert_eq!(calc_angle(&lm(1.0, 1.0), &lm(1.0, 1.0), &lm(2.0, 3.0)), None);
        let straight = calc_angle(&lm(-1.0, 0.0), &lm(0.0, 0.0), &lm(1.0, 0.0)).unwrap();
        assert!((straight - 180.0).abs() < 1e-3);
    }
}
