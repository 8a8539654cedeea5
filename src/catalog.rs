use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PoseError;
use crate::similarity::JointAngles;
use crate::types::{NamedKeypoint, Pose, PoseDocument};

const TARGET_SUFFIX: &str = "_landmarks.json";

/// A reference pose reduced to its joint angles.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetPose {
    pub name: String,
    pub path: PathBuf,
    pub angles: JointAngles,
}

impl TargetPose {
    pub fn from_pose(name: impl Into<String>, path: impl Into<PathBuf>, pose: &Pose) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            angles: JointAngles::from_pose(pose),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LandmarkFile {
    Document(PoseDocument),
    Keypoints(Vec<NamedKeypoint>),
}

/// Reads a landmark file, either `{"keypoints": [...]}` or a bare keypoint list.
pub fn load_pose_document(path: &Path) -> Result<PoseDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read landmark file {}", path.display()))?;
    let parsed: LandmarkFile = serde_json::from_str(&raw)
        .with_context(|| format!("unrecognized landmark JSON in {}", path.display()))?;
    Ok(match parsed {
        LandmarkFile::Document(doc) => doc,
        LandmarkFile::Keypoints(keypoints) => PoseDocument {
            keypoints,
            keypoints_3d: Vec::new(),
        },
    })
}

pub fn load_pose_file(path: &Path) -> Result<Pose> {
    Ok(load_pose_document(path)?.to_pose())
}

/// Target poses keyed by name, loaded once and read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct TargetCatalog {
    targets: BTreeMap<String, TargetPose>,
}

impl TargetCatalog {
    /// Loads every `<name>_landmarks.json` in `dir`. Unreadable entries are
    /// skipped; a missing directory yields an empty catalog.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!("targets directory {} does not exist", dir.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list targets in {}", dir.display()));
            }
        };

        let mut targets = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(|f| f.strip_suffix(TARGET_SUFFIX))
            else {
                continue;
            };
            match load_pose_file(&path) {
                Ok(pose) => {
                    let target = TargetPose::from_pose(name, &path, &pose);
                    targets.insert(name.to_string(), target);
                }
                Err(err) => log::warn!("failed to load target {}: {err:#}", path.display()),
            }
        }
        log::info!("loaded {} target poses from {}", targets.len(), dir.display());
        Ok(Self { targets })
    }

    pub fn from_targets(targets: impl IntoIterator<Item = TargetPose>) -> Self {
        Self {
            targets: targets.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// Target names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Result<&TargetPose, PoseError> {
        self.targets
            .get(name)
            .ok_or_else(|| PoseError::UnknownTarget(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
