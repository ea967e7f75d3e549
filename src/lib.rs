//! TextSight - two-stage OCR over ONNX Runtime
//!
//! Finds text regions in an encoded image with a segmentation model and
//! reads each region with a sequence recognition model.

pub mod config;
pub mod storage;
pub mod vision;

pub use config::PipelineConfig;
pub use vision::{
    BatchRunner, CodecError, OcrError, OcrOutput, OcrPipeline, SharedPipeline, TextRegion,
};
