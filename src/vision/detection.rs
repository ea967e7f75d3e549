//! Text region detection
//!
//! Runs a segmentation model over the whole image, thresholds the resulting
//! probability map, and turns each connected foreground component into a
//! rotated quadrilateral. Each quadrilateral is widened into an axis-aligned
//! crop that the recognition stage consumes.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use std::path::Path;
use tracing::{debug, warn};

use super::error::{OcrError, StageResult};
use super::geometry::{expand_rect, min_area_rect, CropRect, RegionPolygon};
use super::preprocess::{detection_size, resize, to_channel_order, write_planar};
use super::scratch::ScratchBuffer;
use super::session::{InferenceSession, ModelOutput, OnnxSession, ShapeCache};
use super::stage::{InferenceStage, Prepared};
use crate::config::{DetectionSettings, SessionSettings};

/// A detected text region cut out of the resized image
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    /// Rotated quadrilateral in resized-image coordinates
    pub polygon: RegionPolygon,
    /// Expanded crop rectangle in resized-image coordinates
    pub bounds: CropRect,
    /// The same rectangle mapped back onto the input image
    pub source_bounds: CropRect,
    /// Deep copy of the pixels inside `bounds`, in codec channel order
    pub image: RgbImage,
}

impl CroppedRegion {
    /// Whether the crop holds no pixels
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// Text detection stage
pub struct TextDetector {
    session: Box<dyn InferenceSession>,
    settings: DetectionSettings,
    scratch: ScratchBuffer,
    shapes: ShapeCache,
}

impl TextDetector {
    /// Create a detector around an already-loaded session
    pub fn new(session: Box<dyn InferenceSession>, settings: DetectionSettings) -> Self {
        Self {
            session,
            settings,
            scratch: ScratchBuffer::new(),
            shapes: ShapeCache::new(),
        }
    }

    /// Load the detection model from disk
    pub fn from_model(
        model_path: &Path,
        session_settings: &SessionSettings,
        settings: DetectionSettings,
    ) -> StageResult<Self> {
        let session = OnnxSession::new(model_path, session_settings)?;
        Ok(Self::new(Box::new(session), settings))
    }

    /// Current detection settings
    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    /// Change the binarization threshold
    pub fn set_threshold(&mut self, threshold: f32) {
        self.settings.threshold = threshold;
    }

    /// Number of input shape descriptors built so far
    pub fn shape_rebuilds(&self) -> u64 {
        self.shapes.rebuilds()
    }

    /// Detect regions, surfacing inference failures
    pub fn try_detect(&mut self, image: &RgbImage) -> StageResult<Vec<CroppedRegion>> {
        self.infer(image)
    }

    /// Detect regions; any failure yields an empty list
    pub fn detect(&mut self, image: &RgbImage) -> Vec<CroppedRegion> {
        self.try_detect(image).unwrap_or_else(|e| {
            warn!("Text detection failed: {}", e);
            Vec::new()
        })
    }
}

impl InferenceStage for TextDetector {
    type Input = RgbImage;
    type Output = Vec<CroppedRegion>;

    fn preprocess(&mut self, image: &RgbImage) -> StageResult<Prepared> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::InvalidInput("image has zero area".to_string()));
        }

        let (new_w, new_h) = detection_size(
            width,
            height,
            self.settings.max_side_len,
            self.settings.stride,
        )
        .ok_or_else(|| {
            OcrError::InvalidInput(format!(
                "{}x{} image is too thin to align to stride {}",
                width, height, self.settings.stride
            ))
        })?;

        let ordered = to_channel_order(image, self.settings.channel_order);
        let resized = resize(&ordered, new_w, new_h);

        let dims = [1, 3, new_h as usize, new_w as usize];
        write_planar(&resized, self.scratch.prepare(dims.iter().product()));

        Ok(Prepared {
            dims,
            resized,
            scale: (new_w as f32 / width as f32, new_h as f32 / height as f32),
        })
    }

    fn infer(&mut self, image: &RgbImage) -> StageResult<Vec<CroppedRegion>> {
        let prepared = match self.preprocess(image) {
            Ok(prepared) => prepared,
            Err(OcrError::InvalidInput(reason)) => {
                debug!("Skipping detection: {}", reason);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let shape = self.shapes.descriptor(prepared.dims);
        let output = self
            .session
            .run(self.scratch.as_slice(prepared.len()), shape)?;

        self.postprocess(&output, &prepared)
    }

    fn postprocess(&mut self, output: &ModelOutput, prepared: &Prepared) -> StageResult<Vec<CroppedRegion>> {
        let rank = output.shape.len();
        if rank < 2 {
            return Err(OcrError::Inference(format!(
                "probability map has shape {:?}",
                output.shape
            )));
        }
        let (map_h, map_w) = (output.shape[rank - 2], output.shape[rank - 1]);
        let plane = map_h * map_w;
        if output.data.len() < plane {
            return Err(OcrError::Inference(format!(
                "probability map holds {} values, shape {:?} needs {}",
                output.data.len(),
                output.shape,
                plane
            )));
        }

        let polygons = find_region_polygons(
            &output.data[..plane],
            map_w as u32,
            map_h as u32,
            self.settings.threshold,
        );

        let restored = to_channel_order(&prepared.resized, self.settings.channel_order);
        let (img_w, img_h) = restored.dimensions();
        let (sx, sy) = prepared.scale;

        let regions: Vec<CroppedRegion> = polygons
            .into_iter()
            .map(|polygon| {
                let bounds = expand_rect(
                    polygon.bounding_rect(),
                    self.settings.horizontal_ratio,
                    self.settings.vertical_ratio,
                    img_w,
                    img_h,
                );
                let image = imageops::crop_imm(&restored, bounds.x, bounds.y, bounds.width, bounds.height)
                    .to_image();
                CroppedRegion {
                    polygon,
                    bounds,
                    source_bounds: bounds.scaled(1.0 / sx, 1.0 / sy),
                    image,
                }
            })
            .collect();

        debug!(
            "Detection produced {} regions from a {}x{} map",
            regions.len(),
            map_w,
            map_h
        );
        Ok(regions)
    }
}

/// Foreground mask: 255 where `prob >= threshold`, else 0
pub fn binarize(map: &[f32], width: u32, height: u32, threshold: f32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let prob = map[(y * width + x) as usize];
        Luma([if prob >= threshold { 255 } else { 0 }])
    })
}

/// Rotated quadrilaterals of the outermost foreground components
///
/// Order follows contour discovery and is stable for identical input.
pub fn find_region_polygons(map: &[f32], width: u32, height: u32, threshold: f32) -> Vec<RegionPolygon> {
    let binary = binarize(map, width, height, threshold);
    let contours: Vec<Contour<u32>> = find_contours(&binary);

    contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|c| min_area_rect(&c.points))
        .collect()
}
