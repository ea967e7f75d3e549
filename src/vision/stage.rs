//! Inference stage contract
//!
//! Detection and recognition both run preprocess -> session -> postprocess.
//! Each stage implements the three steps on its own; the only state they
//! share in kind is an `InferenceSession`, a scratch buffer, and a shape cache.

use image::RgbImage;

use super::error::StageResult;
use super::session::ModelOutput;

/// Result of preprocessing: the tensor lives in the stage's scratch buffer
#[derive(Debug, Clone)]
pub struct Prepared {
    /// `[1, 3, height, width]`
    pub dims: [usize; 4],
    /// The resized image the tensor was built from, in model channel order
    pub resized: RgbImage,
    /// Resized size divided by original size, per axis
    pub scale: (f32, f32),
}

impl Prepared {
    /// Number of tensor elements written to the scratch buffer
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One model-backed step of the OCR pipeline
pub trait InferenceStage {
    /// Image type the stage consumes
    type Input: ?Sized;
    /// Decoded result of one call
    type Output;

    /// Resize and lay out `input` as a planar tensor in the scratch buffer
    fn preprocess(&mut self, input: &Self::Input) -> StageResult<Prepared>;

    /// Run preprocess, the session, and postprocess for one input
    fn infer(&mut self, input: &Self::Input) -> StageResult<Self::Output>;

    /// Decode raw model output
    fn postprocess(&mut self, output: &ModelOutput, prepared: &Prepared) -> StageResult<Self::Output>;
}
