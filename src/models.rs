use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const MODEL_DIR: &str = "models";
const ZOO_BASE: &str = "https://github.com/opencv/opencv_zoo/raw/main/models";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    PoseDetector,
    PoseLandmarker,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::PoseDetector => "pose detector",
            ModelKind::PoseLandmarker => "pose landmarker",
        }
    }

    /// `(zoo directory, file name)` of the stock ONNX export.
    fn zoo_entry(&self) -> (&'static str, &'static str) {
        match self {
            ModelKind::PoseDetector => (
                "person_detection_mediapipe",
                "person_detection_mediapipe_2023mar.onnx",
            ),
            ModelKind::PoseLandmarker => (
                "pose_estimation_mediapipe",
                "pose_estimation_mediapipe_2023mar.onnx",
            ),
        }
    }

    fn url(&self) -> String {
        let (dir, file) = self.zoo_entry();
        format!("{ZOO_BASE}/{dir}/{file}")
    }

    pub fn default_path(&self) -> PathBuf {
        Path::new(MODEL_DIR).join(self.zoo_entry().1)
    }
}

pub fn default_detector_model_path() -> PathBuf {
    ModelKind::PoseDetector.default_path()
}

pub fn default_landmark_model_path() -> PathBuf {
    ModelKind::PoseLandmarker.default_path()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelEvent {
    AlreadyPresent(ModelKind),
    Downloading { model: ModelKind, total: Option<u64> },
    Downloaded { model: ModelKind, bytes: u64 },
}

/// Makes sure `path` holds a model file, fetching the stock export into it
/// when missing. Download progress goes to a terminal bar.
pub fn ensure_model_ready<F>(model: ModelKind, path: &Path, mut on_event: F) -> Result<()>
where
    F: FnMut(ModelEvent),
{
    if path.is_file() {
        log::debug!("{} model found at {}", model.label(), path.display());
        on_event(ModelEvent::AlreadyPresent(model));
        return Ok(());
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;
    }

    let staged = path.with_extension("part");
    let fetched = fetch(model, &staged, &mut on_event).and_then(|bytes| {
        fs::rename(&staged, path)
            .with_context(|| format!("failed to move model into {}", path.display()))?;
        Ok(bytes)
    });
    match fetched {
        Ok(bytes) => {
            on_event(ModelEvent::Downloaded { model, bytes });
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&staged);
            Err(err.context(format!(
                "could not provide {} model at {}",
                model.label(),
                path.display()
            )))
        }
    }
}

fn fetch<F>(model: ModelKind, dest: &Path, on_event: &mut F) -> Result<u64>
where
    F: FnMut(ModelEvent),
{
    let url = model.url();
    log::info!("fetching {} model from {url}", model.label());

    let mut response = Client::new()
        .get(&url)
        .send()
        .with_context(|| format!("request to {url} failed"))?
        .error_for_status()?;
    let total = response.content_length();
    on_event(ModelEvent::Downloading { model, total });

    let bar = progress_bar(total);
    let mut file = fs::File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    let bytes = io::copy(&mut response, &mut bar.wrap_write(&mut file))
        .context("model transfer interrupted")?;
    file.sync_all()?;
    bar.finish_and_clear();

    if bytes == 0 {
        bail!("server returned an empty body for {url}");
    }
    log::info!("{} model downloaded ({bytes} bytes)", model.label());
    Ok(bytes)
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let (bar, template) = match total {
        Some(len) if len > 0 => (
            ProgressBar::new(len),
            "{msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ),
        _ => (ProgressBar::new_spinner(), "{spinner:.green} {msg} {bytes}"),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar.set_message("model");
    bar
}
