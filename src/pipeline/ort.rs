use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, ExecutionProviderDispatch, XNNPACKExecutionProvider,
};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::{Tensor, ValueType};

use super::engine::{InferenceEngine, RawTensor};
use crate::{
    config::PipelineConfig,
    models::{ModelKind, ensure_model_ready},
};

/// ONNX Runtime backend holding the detector and landmark sessions.
pub struct OrtEngine {
    detector: OrtModel,
    landmarker: OrtModel,
}

impl OrtEngine {
    /// Downloads missing models, then loads both sessions.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        for (kind, path) in [
            (ModelKind::PoseDetector, &cfg.detector_model_path),
            (ModelKind::PoseLandmarker, &cfg.landmark_model_path),
        ] {
            ensure_model_ready(kind, path, |evt| log::debug!("{evt:?}"))?;
        }

        let delegate = cfg.delegate.as_deref();
        let detector = OrtModel::load(
            ModelKind::PoseDetector,
            &cfg.detector_model_path,
            delegate,
            cfg.intra_threads,
        )?;
        let landmarker = OrtModel::load(
            ModelKind::PoseLandmarker,
            &cfg.landmark_model_path,
            delegate,
            cfg.intra_threads,
        )?;

        log::info!(
            "pose ORT backend ready using detector {} and landmarker {}",
            cfg.detector_model_path.display(),
            cfg.landmark_model_path.display()
        );
        Ok(Self {
            detector,
            landmarker,
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn run_detector(&mut self, input: Array4<f32>) -> Result<Vec<RawTensor>> {
        self.detector.run(input)
    }

    fn run_landmarker(&mut self, input: Array4<f32>) -> Result<Vec<RawTensor>> {
        self.landmarker.run(input)
    }

    fn detector_anchor_count(&self) -> Option<usize> {
        // scores are the smallest output, [1, anchors, 1]
        self.detector
            .output_dims
            .iter()
            .flatten()
            .filter(|dims| dims.len() >= 2)
            .min_by_key(|dims| dims.iter().product::<usize>())
            .map(|dims| dims[dims.len() - 2])
    }
}

struct OrtModel {
    kind: ModelKind,
    session: Session,
    output_names: Vec<String>,
    /// Static output shapes; `None` where a dimension is dynamic.
    output_dims: Vec<Option<Vec<usize>>>,
    channels_first: bool,
}

impl OrtModel {
    fn load(kind: ModelKind, path: &Path, delegate: Option<&str>, intra_threads: usize) -> Result<Self> {
        let provider = match delegate.map(execution_provider).transpose() {
            Ok(provider) => provider.flatten(),
            Err(err) => {
                log::warn!("{}: {err:#}, using CPU", kind.label());
                None
            }
        };
        let session = match provider {
            Some(provider) => match build_session(path, intra_threads, Some(provider)) {
                Ok(session) => session,
                Err(err) => {
                    log::warn!(
                        "{}: delegate {:?} failed to load ({err:#}), falling back to CPU",
                        kind.label(),
                        delegate.unwrap_or_default()
                    );
                    build_session(path, intra_threads, None)?
                }
            },
            None => build_session(path, intra_threads, None)?,
        };

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("{} model declares no inputs", kind.label()))?;
        let channels_first = matches!(
            static_dims(&input.input_type).as_deref(),
            Some([_, 3, _, _])
        );
        if channels_first {
            log::debug!("{} expects NCHW input", kind.label());
        }

        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();
        let output_dims = session
            .outputs
            .iter()
            .map(|o| static_dims(&o.output_type))
            .collect();

        Ok(Self {
            kind,
            session,
            output_names,
            output_dims,
            channels_first,
        })
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<RawTensor>> {
        let input = if self.channels_first {
            input
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned()
        } else {
            input
        };
        let tensor = Tensor::from_array(input)?;
        let label = self.kind.label();
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .with_context(|| format!("failed to run {label} session"))?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            match outputs[name.as_str()].try_extract_array::<f32>() {
                Ok(array) => tensors.push(RawTensor::new(
                    name.clone(),
                    array.shape().to_vec(),
                    array.iter().copied().collect(),
                )),
                Err(err) => log::debug!("{label}: skipping non-f32 output {name}: {err}"),
            }
        }
        Ok(tensors)
    }
}

/// `cpu` (or an empty name) selects no provider.
fn execution_provider(name: &str) -> Result<Option<ExecutionProviderDispatch>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "cpu" => Ok(None),
        "xnnpack" => Ok(Some(
            XNNPACKExecutionProvider::default().build().error_on_failure(),
        )),
        "cuda" => Ok(Some(
            CUDAExecutionProvider::default().build().error_on_failure(),
        )),
        other => Err(anyhow!("unknown delegate {other:?}")),
    }
}

fn build_session(
    path: &Path,
    intra_threads: usize,
    provider: Option<ExecutionProviderDispatch>,
) -> Result<Session> {
    let mut builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?;
    if let Some(provider) = provider {
        builder = builder.with_execution_providers([provider])?;
    }
    builder
        .commit_from_file(path)
        .with_context(|| format!("failed to load ORT session from {}", path.display()))
}

fn static_dims(value_type: &ValueType) -> Option<Vec<usize>> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape
            .iter()
            .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegate_names() {
        assert!(execution_provider("cpu").unwrap().is_none());
        assert!(execution_provider(" ").unwrap().is_none());
        assert!(execution_provider("XNNPACK").unwrap().is_some());
        assert!(execution_provider("libethosu_delegate.so").is_err());
    }
}
