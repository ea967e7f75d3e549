//! Vision/OCR Layer
//!
//! Two-stage text extraction over ONNX Runtime:
//! - detection finds text regions and crops them out of the image
//! - recognition turns each crop into a string
//!
//! `OcrPipeline` composes the two stages behind the image codec.

pub mod codec;
pub mod detection;
pub mod dictionary;
pub mod error;
pub mod geometry;
pub mod models;
pub mod preprocess;
pub mod recognition;
pub mod scratch;
pub mod session;
pub mod stage;
pub mod worker;

use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::PipelineConfig;

pub use codec::{decode, decode_bytes};
pub use detection::{CroppedRegion, TextDetector};
pub use dictionary::CharacterDictionary;
pub use error::{CodecError, OcrError, StageResult};
pub use geometry::{CropRect, RegionPolygon};
pub use models::{ModelManager, ModelType, ResolvedModels};
pub use recognition::TextRecognizer;
pub use session::{InferenceSession, ModelOutput, OnnxSession, TensorShape};
pub use stage::InferenceStage;
pub use worker::BatchRunner;

/// Recognized text region
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TextRegion {
    /// Recognized text, never empty
    pub text: String,
    /// Rotated quadrilateral corners in detection-resolution coordinates
    pub polygon: [(i32, i32); 4],
    /// Crop rectangle in detection-resolution coordinates
    pub bounds: CropRect,
    /// Crop rectangle in input image coordinates
    pub source_bounds: CropRect,
}

/// Result of running the pipeline on one image
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OcrOutput {
    /// Width of the decoded input image
    pub image_width: u32,
    /// Height of the decoded input image
    pub image_height: u32,
    /// Recognized regions in detection order
    pub regions: Vec<TextRegion>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

impl OcrOutput {
    /// Region texts joined by newlines
    pub fn text(&self) -> String {
        self.regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Detection followed by recognition
pub struct OcrPipeline {
    detector: TextDetector,
    recognizer: TextRecognizer,
}

impl OcrPipeline {
    pub fn new(detector: TextDetector, recognizer: TextRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both stages from resolved model artifacts
    pub fn from_config(config: &PipelineConfig, models: &ResolvedModels) -> StageResult<Self> {
        info!("Initializing OCR pipeline");

        let detector = TextDetector::from_model(
            &models.detection,
            &config.session,
            config.detection.clone(),
        )?;
        let recognizer = TextRecognizer::from_files(
            &models.recognition,
            &models.dictionary,
            &config.session,
            config.recognition.clone(),
        )?;

        info!(
            "OCR pipeline ready ({} glyphs)",
            recognizer.dictionary().len()
        );
        Ok(Self::new(detector, recognizer))
    }

    pub fn detector(&self) -> &TextDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut TextDetector {
        &mut self.detector
    }

    pub fn recognizer(&self) -> &TextRecognizer {
        &self.recognizer
    }

    pub fn recognizer_mut(&mut self) -> &mut TextRecognizer {
        &mut self.recognizer
    }

    /// Decode an encoded image and extract its text
    pub fn process_bytes(&mut self, data: &[u8]) -> Result<OcrOutput, CodecError> {
        let start = Instant::now();
        let image = decode_bytes(data)?;
        Ok(self.run(&image, start))
    }

    /// Extract text from an already-decoded image
    pub fn process_image(&mut self, image: &RgbImage) -> OcrOutput {
        self.run(image, Instant::now())
    }

    fn run(&mut self, image: &RgbImage, start: Instant) -> OcrOutput {
        let crops = self.detector.detect(image);
        let detected = crops.len();

        let regions: Vec<TextRegion> = crops
            .into_iter()
            .filter(|crop| !crop.is_empty())
            .filter_map(|crop| {
                let text = self.recognizer.recognize(&crop.image);
                if text.is_empty() {
                    return None;
                }
                Some(TextRegion {
                    text,
                    polygon: crop.polygon.0.map(|p| (p.x, p.y)),
                    bounds: crop.bounds,
                    source_bounds: crop.source_bounds,
                })
            })
            .collect();

        let processing_time = start.elapsed();
        debug!(
            "OCR complete in {:?}: {} regions detected, {} with text",
            processing_time,
            detected,
            regions.len()
        );

        OcrOutput {
            image_width: image.width(),
            image_height: image.height(),
            regions,
            processing_time_ms: processing_time.as_millis() as u64,
        }
    }
}

/// One pipeline shared across threads; calls are serialized by a mutex
#[derive(Clone)]
pub struct SharedPipeline {
    inner: Arc<Mutex<OcrPipeline>>,
}

impl SharedPipeline {
    pub fn new(pipeline: OcrPipeline) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pipeline)),
        }
    }

    pub fn process_bytes(&self, data: &[u8]) -> Result<OcrOutput, CodecError> {
        self.inner.lock().process_bytes(data)
    }

    pub fn process_image(&self, image: &RgbImage) -> OcrOutput {
        self.inner.lock().process_image(image)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::vision::codec::encode_png;
    use crate::vision::session::testing::ScriptedSession;
    use crate::config::RecognitionSettings;

    #[test]
    fn test_process_image_reads_each_region() {
        // Blocks 10x4 and 30x4 expand to 14x8 and 42x8 crops
        let image = image_with_blocks(64, 32, &[(4, 4, 14, 8), (20, 20, 50, 24)]);
        let mut pipeline = scripted_pipeline();

        let output = pipeline.process_image(&image);

        assert_eq!((output.image_width, output.image_height), (64, 32));
        let mut texts: Vec<&str> = output.regions.iter().map(|r| r.text.as_str()).collect();
        texts.sort_unstable();
        assert_eq!(texts, vec!["A", "B"]);

        for region in &output.regions {
            assert!(region.bounds.x + region.bounds.width <= 64);
            assert!(region.bounds.y + region.bounds.height <= 32);
            assert_eq!(region.bounds, region.source_bounds);
        }
    }

    #[test]
    fn test_process_bytes_maps_bounds_to_source() {
        // 128x64 input is detected at 64x32
        let image = image_with_blocks(128, 64, &[(20, 16, 60, 32)]);
        let bytes = encode_png(&image);
        let mut pipeline = scripted_pipeline();

        let output = pipeline.process_bytes(&bytes).unwrap();

        assert_eq!(output.regions.len(), 1);
        let region = &output.regions[0];
        assert_eq!(region.bounds, CropRect { x: 6, y: 4, width: 28, height: 16 });
        assert_eq!(region.source_bounds, CropRect { x: 12, y: 8, width: 56, height: 32 });
    }

    #[test]
    fn test_process_bytes_rejects_bad_input() {
        let mut pipeline = scripted_pipeline();

        assert_eq!(pipeline.process_bytes(&[]).unwrap_err(), CodecError::InvalidInput);
        assert!(matches!(
            pipeline.process_bytes(b"not an image at all"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_blank_image_has_no_regions() {
        let mut pipeline = scripted_pipeline();
        let output = pipeline.process_image(&image_with_blocks(64, 32, &[]));

        assert!(output.regions.is_empty());
        assert_eq!(output.text(), "");
    }

    #[test]
    fn test_empty_recognition_is_dropped() {
        let silent = ScriptedSession::new(|_, _| {
            Ok(ModelOutput {
                shape: vec![1, 3, 4],
                data: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            })
        });
        let recognizer = TextRecognizer::new(
            Box::new(silent),
            CharacterDictionary::from_glyphs(GLYPHS),
            RecognitionSettings::default(),
        );
        let mut pipeline = OcrPipeline::new(red_channel_detector(), recognizer);

        let output = pipeline.process_image(&image_with_blocks(64, 32, &[(10, 8, 30, 16)]));

        assert!(output.regions.is_empty());
    }

    #[test]
    fn test_detection_failure_yields_no_regions() {
        let detector = TextDetector::new(Box::new(ScriptedSession::failing()), Default::default());
        let mut pipeline = OcrPipeline::new(detector, width_keyed_recognizer());

        let output = pipeline.process_image(&image_with_blocks(64, 32, &[(10, 8, 30, 16)]));

        assert!(output.regions.is_empty());
    }

    #[test]
    fn test_shared_pipeline_across_threads() {
        let shared = SharedPipeline::new(scripted_pipeline());
        let image = image_with_blocks(64, 32, &[(10, 8, 30, 16)]);
        let expected = shared.process_image(&image).regions;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let image = image.clone();
                std::thread::spawn(move || shared.process_image(&image).regions)
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn test_output_serializes_to_json() {
        let mut pipeline = scripted_pipeline();
        let output = pipeline.process_image(&image_with_blocks(64, 32, &[(10, 8, 30, 16)]));

        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["regions"][0]["text"], "A");
        assert_eq!(json["regions"][0]["bounds"]["width"], 28);
        assert_eq!(json["image_width"], 64);
    }
}
