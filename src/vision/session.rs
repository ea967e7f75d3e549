//! Inference session wrapper
//!
//! `InferenceSession` is the seam between the stages and the model runtime.
//! `OnnxSession` is the ONNX Runtime implementation; it owns the loaded
//! model and caches the names of its single input and single output.

use ndarray::{ArrayViewD, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use tracing::{debug, info};

use super::error::{OcrError, StageResult};
use crate::config::{OptimizationLevel, SessionSettings};

/// Shape of an input tensor, e.g. `[1, 3, height, width]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    /// Dimensions in order
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of elements a tensor of this shape holds
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }
}

/// Last tensor shape used by a stage
///
/// A descriptor is rebuilt only when the requested dimensions differ from
/// the cached ones.
#[derive(Debug, Default)]
pub struct ShapeCache {
    current: Option<TensorShape>,
    rebuilds: u64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the descriptor for `dims`, rebuilding it if the shape changed
    pub fn descriptor(&mut self, dims: [usize; 4]) -> &TensorShape {
        let stale = self
            .current
            .as_ref()
            .map_or(true, |shape| shape.dims() != dims.as_slice());
        if stale {
            debug!("Input shape changed to {:?}, rebuilding descriptor", dims);
            self.rebuilds += 1;
            self.current = Some(TensorShape {
                dims: dims.to_vec(),
            });
        }
        self.current.get_or_insert_with(|| TensorShape {
            dims: dims.to_vec(),
        })
    }

    /// How many descriptors have been built so far
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Flat `f32` output of a model run together with its shape
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A loaded model that maps one input tensor to one output tensor
pub trait InferenceSession: Send {
    /// Name of the model's first declared input
    fn input_name(&self) -> &str;

    /// Name of the model's first declared output
    fn output_name(&self) -> &str;

    /// Run the model synchronously on a planar `f32` tensor
    fn run(&mut self, input: &[f32], shape: &TensorShape) -> StageResult<ModelOutput>;
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish_non_exhaustive()
    }
}

impl OnnxSession {
    /// Load a model file with the given execution settings
    pub fn new(model_path: &Path, settings: &SessionSettings) -> StageResult<Self> {
        let load_error = |message: String| OcrError::ModelLoad {
            path: model_path.to_path_buf(),
            message,
        };

        if !model_path.is_file() {
            return Err(load_error("model file not found".to_string()));
        }

        info!("Loading ONNX model from {:?}", model_path);

        let session = Self::configure(settings)
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| load_error(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| load_error("model declares no inputs".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| load_error("model declares no outputs".to_string()))?;

        info!(
            "Model loaded. Input: {}, Output: {}",
            input_name, output_name
        );

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    fn configure(settings: &SessionSettings) -> Result<SessionBuilder, ort::Error> {
        let level = match settings.optimization_level {
            OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
            OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
            OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
            OptimizationLevel::All => GraphOptimizationLevel::Level3,
        };

        Session::builder()?
            .with_execution_providers([CPUExecutionProvider::default()
                .with_arena_allocator(settings.cpu_arena)
                .build()])?
            .with_optimization_level(level)?
            .with_intra_threads(settings.effective_intra_threads())?
            .with_inter_threads(settings.inter_threads.max(1))?
            .with_parallel_execution(settings.parallel_execution)?
            .with_memory_pattern(settings.memory_pattern)
    }
}

impl InferenceSession for OnnxSession {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_name(&self) -> &str {
        &self.output_name
    }

    fn run(&mut self, input: &[f32], shape: &TensorShape) -> StageResult<ModelOutput> {
        let view = ArrayViewD::from_shape(IxDyn(shape.dims()), input).map_err(|e| {
            OcrError::Inference(format!(
                "input of {} values does not fit shape {:?}: {}",
                input.len(),
                shape.dims(),
                e
            ))
        })?;

        let input_tensor = TensorRef::from_array_view(view)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        let (output_shape, output_data) =
            outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        let shape = output_shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                OcrError::Inference(format!("output has a dynamic dimension: {:?}", output_shape))
            })?;

        Ok(ModelOutput {
            shape,
            data: output_data.to_vec(),
        })
    }
}
