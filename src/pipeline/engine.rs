use anyhow::Result;
use ndarray::Array4;

/// One model output copied out of the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The two-model runtime. Implementations are not expected to tolerate
/// concurrent invocation; callers serialize access.
pub trait InferenceEngine: Send + 'static {
    /// `input` is NHWC `[1, 224, 224, 3]` in [-1, 1].
    fn run_detector(&mut self, input: Array4<f32>) -> Result<Vec<RawTensor>>;

    /// `input` is NHWC `[1, 256, 256, 3]` in [0, 1].
    fn run_landmarker(&mut self, input: Array4<f32>) -> Result<Vec<RawTensor>>;

    /// Anchor count implied by the detector's score output, when the model
    /// declares it statically.
    fn detector_anchor_count(&self) -> Option<usize>;
}
