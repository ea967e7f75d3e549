//! Text recognition
//!
//! Normalizes a cropped region to a fixed height, runs the sequence model,
//! and greedily decodes the per-timestep class scores into a string.

use image::RgbImage;
use std::path::Path;
use tracing::{debug, warn};

use super::dictionary::CharacterDictionary;
use super::error::{OcrError, StageResult};
use super::preprocess::{recognition_width, resize, to_channel_order, write_planar};
use super::scratch::ScratchBuffer;
use super::session::{InferenceSession, ModelOutput, OnnxSession, ShapeCache};
use super::stage::{InferenceStage, Prepared};
use crate::config::{RecognitionSettings, SessionSettings};

/// Index of the reserved blank class
pub const BLANK_CLASS: usize = 0;

/// Text recognition stage
pub struct TextRecognizer {
    session: Box<dyn InferenceSession>,
    dictionary: CharacterDictionary,
    settings: RecognitionSettings,
    scratch: ScratchBuffer,
    shapes: ShapeCache,
    /// Per-timestep argmax classes of the last call
    predictions: Vec<usize>,
}

impl TextRecognizer {
    /// Create a recognizer around an already-loaded session
    pub fn new(
        session: Box<dyn InferenceSession>,
        dictionary: CharacterDictionary,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            session,
            dictionary,
            settings,
            scratch: ScratchBuffer::new(),
            shapes: ShapeCache::new(),
            predictions: Vec::new(),
        }
    }

    /// Load the recognition model and its character dictionary
    ///
    /// The dictionary is read first so a bad dictionary never costs a model load.
    pub fn from_files(
        model_path: &Path,
        dictionary_path: &Path,
        session_settings: &SessionSettings,
        settings: RecognitionSettings,
    ) -> StageResult<Self> {
        let dictionary = CharacterDictionary::from_file(dictionary_path)?;
        let session = OnnxSession::new(model_path, session_settings)?;
        Ok(Self::new(Box::new(session), dictionary, settings))
    }

    /// The loaded character dictionary
    pub fn dictionary(&self) -> &CharacterDictionary {
        &self.dictionary
    }

    /// Number of input shape descriptors built so far
    pub fn shape_rebuilds(&self) -> u64 {
        self.shapes.rebuilds()
    }

    /// Recognize a region, surfacing failures
    pub fn try_recognize(&mut self, region: &RgbImage) -> StageResult<String> {
        self.infer(region)
    }

    /// Recognize a region; any failure yields an empty string
    pub fn recognize(&mut self, region: &RgbImage) -> String {
        self.try_recognize(region).unwrap_or_else(|e| {
            warn!("Text recognition failed: {}", e);
            String::new()
        })
    }
}

impl InferenceStage for TextRecognizer {
    type Input = RgbImage;
    type Output = String;

    fn preprocess(&mut self, region: &RgbImage) -> StageResult<Prepared> {
        let (width, height) = region.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::InvalidInput("region image has zero area".to_string()));
        }

        let target_height = self.settings.target_height;
        let new_w = recognition_width(width, height, target_height);
        if new_w == 0 || target_height == 0 {
            return Err(OcrError::InvalidInput(format!(
                "{}x{} region resizes to zero width",
                width, height
            )));
        }

        let ordered = to_channel_order(region, self.settings.channel_order);
        let resized = resize(&ordered, new_w, target_height);

        let dims = [1, 3, target_height as usize, new_w as usize];
        write_planar(&resized, self.scratch.prepare(dims.iter().product()));

        Ok(Prepared {
            dims,
            resized,
            scale: (new_w as f32 / width as f32, target_height as f32 / height as f32),
        })
    }

    fn infer(&mut self, region: &RgbImage) -> StageResult<String> {
        let prepared = self.preprocess(region)?;

        let shape = self.shapes.descriptor(prepared.dims);
        let output = self
            .session
            .run(self.scratch.as_slice(prepared.len()), shape)?;

        self.postprocess(&output, &prepared)
    }

    fn postprocess(&mut self, output: &ModelOutput, _prepared: &Prepared) -> StageResult<String> {
        let (seq_len, num_classes) = match output.shape.as_slice() {
            [_, seq, classes] => (*seq, *classes),
            [seq, classes] => (*seq, *classes),
            other => {
                return Err(OcrError::Inference(format!(
                    "sequence output has shape {:?}",
                    other
                )))
            }
        };
        if output.data.len() < seq_len * num_classes {
            return Err(OcrError::Inference(format!(
                "sequence output holds {} values, shape {:?} needs {}",
                output.data.len(),
                output.shape,
                seq_len * num_classes
            )));
        }

        argmax_sequence(&output.data, seq_len, num_classes, &mut self.predictions);
        let text = decode_greedy(
            &self.predictions,
            &self.dictionary,
            &self.settings.placeholder_glyphs,
        );

        debug!(
            "Recognized {:?} from {} timesteps over {} classes",
            text, seq_len, num_classes
        );
        Ok(text)
    }
}

/// Best class per timestep; ties go to the lowest index
///
/// `out` is cleared and refilled with `seq_len` entries.
pub fn argmax_sequence(scores: &[f32], seq_len: usize, num_classes: usize, out: &mut Vec<usize>) {
    out.clear();
    if num_classes == 0 {
        out.resize(seq_len, BLANK_CLASS);
        return;
    }

    out.extend(scores.chunks_exact(num_classes).take(seq_len).map(|row| {
        let mut best = 0;
        for (class, &score) in row.iter().enumerate().skip(1) {
            if score > row[best] {
                best = class;
            }
        }
        best
    }));
}

/// Greedy-collapse per-timestep classes and map them through the dictionary
///
/// The collapsing key is the last class that resolved to a dictionary entry.
/// Blanks and out-of-range classes never move the key, so `[a, blank, a]`
/// reads as a single `a`. Placeholder glyphs and a bare space move the key
/// but are left out of the text.
pub fn decode_greedy(classes: &[usize], dictionary: &CharacterDictionary, placeholders: &[String]) -> String {
    let mut last = None;
    let mut text = String::new();
    for &class in classes {
        if last == Some(class) {
            continue;
        }
        let Some(glyph) = dictionary.glyph_for_class(class) else {
            continue;
        };
        if glyph != " " && !placeholders.iter().any(|p| p == glyph) {
            text.push_str(glyph);
        }
        last = Some(class);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::session::testing::ScriptedSession;
    use crate::vision::session::TensorShape;
    use image::Rgb;
    use std::sync::atomic::Ordering;

    fn dictionary() -> CharacterDictionary {
        CharacterDictionary::from_glyphs(["A", "B", "C", "■", "<blank>", " "])
    }

    fn placeholders() -> Vec<String> {
        RecognitionSettings::default().placeholder_glyphs
    }

    /// One-hot score rows for the given class sequence
    fn one_hot(classes: &[usize], num_classes: usize) -> Vec<f32> {
        let mut scores = vec![0.0f32; classes.len() * num_classes];
        for (t, &class) in classes.iter().enumerate() {
            scores[t * num_classes + class] = 0.9;
        }
        scores
    }

    /// Session that emits the given class sequence whatever the input
    fn emitting(classes: Vec<usize>, num_classes: usize) -> ScriptedSession {
        ScriptedSession::new(move |_, _| {
            Ok(ModelOutput {
                shape: vec![1, classes.len(), num_classes],
                data: one_hot(&classes, num_classes),
            })
        })
    }

    #[test]
    fn test_argmax_lowest_index_wins_ties() {
        let scores = [0.2, 0.5, 0.5, 0.1, 0.7, 0.3, 0.0, 0.0, 0.0];
        let mut out = Vec::new();

        argmax_sequence(&scores, 3, 3, &mut out);

        assert_eq!(out, vec![1, 1, 0]);
    }

    #[test]
    fn test_argmax_handles_negative_logits() {
        let scores = [-5.0, -2.0, -3.0];
        let mut out = vec![7, 7, 7];

        argmax_sequence(&scores, 1, 3, &mut out);

        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_decode_merges_consecutive_duplicates() {
        let (a, b) = (1, 2);
        assert_eq!(decode_greedy(&[a, a, a, b, b, a], &dictionary(), &placeholders()), "ABA");
    }

    #[test]
    fn test_decode_blank_does_not_split_repeats() {
        assert_eq!(decode_greedy(&[1, 0, 1], &dictionary(), &placeholders()), "A");
        assert_eq!(decode_greedy(&[1, 1, 0, 0, 1, 2], &dictionary(), &placeholders()), "AB");
        assert_eq!(decode_greedy(&[0, 0, 0], &dictionary(), &placeholders()), "");
        assert_eq!(decode_greedy(&[], &dictionary(), &placeholders()), "");
    }

    #[test]
    fn test_decode_out_of_range_does_not_split_repeats() {
        assert_eq!(decode_greedy(&[1, 42, 1], &dictionary(), &placeholders()), "A");
    }

    #[test]
    fn test_decode_placeholder_splits_repeats() {
        // ■ is in the dictionary, so it resets the key even though it is not emitted
        assert_eq!(decode_greedy(&[1, 4, 1], &dictionary(), &placeholders()), "AA");
        assert_eq!(decode_greedy(&[2, 6, 6, 2], &dictionary(), &placeholders()), "BB");
    }

    #[test]
    fn test_decode_drops_placeholders_and_spaces() {
        // A, ■, B, <blank>, space, C
        let text = decode_greedy(&[1, 4, 2, 5, 6, 3], &dictionary(), &placeholders());
        assert_eq!(text, "ABC");
    }

    #[test]
    fn test_decode_ignores_out_of_range_classes() {
        let text = decode_greedy(&[1, 42, 2], &dictionary(), &placeholders());
        assert_eq!(text, "AB");
    }

    #[test]
    fn test_preprocess_normalizes_height() {
        let mut recognizer = TextRecognizer::new(
            Box::new(emitting(vec![], 7)),
            dictionary(),
            RecognitionSettings::default(),
        );

        let prepared = recognizer
            .preprocess(&RgbImage::from_pixel(100, 32, Rgb([255, 255, 255])))
            .unwrap();

        assert_eq!(prepared.dims, [1, 3, 48, 150]);
        assert_eq!(prepared.resized.dimensions(), (150, 48));
        let tensor = recognizer.scratch.as_slice(prepared.len());
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_recognize_single_glyph() {
        let classes = vec![0, 0, 1, 1, 1, 0, 0, 0];
        let session = emitting(classes, 7);
        let mut recognizer =
            TextRecognizer::new(Box::new(session), dictionary(), RecognitionSettings::default());

        let region = RgbImage::from_fn(40, 48, |x, _| {
            if (15..25).contains(&x) { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });

        assert_eq!(recognizer.recognize(&region), "A");
    }

    #[test]
    fn test_recognize_empty_sequence() {
        let mut recognizer = TextRecognizer::new(
            Box::new(emitting(vec![], 7)),
            dictionary(),
            RecognitionSettings::default(),
        );

        assert_eq!(recognizer.try_recognize(&RgbImage::new(20, 10)).unwrap(), "");
    }

    #[test]
    fn test_recognize_all_blank() {
        let mut recognizer = TextRecognizer::new(
            Box::new(emitting(vec![0; 12], 7)),
            dictionary(),
            RecognitionSettings::default(),
        );

        assert_eq!(recognizer.try_recognize(&RgbImage::new(20, 10)).unwrap(), "");
    }

    #[test]
    fn test_zero_area_region_is_invalid_input() {
        let session = emitting(vec![1], 7);
        let calls = session.calls.clone();
        let mut recognizer =
            TextRecognizer::new(Box::new(session), dictionary(), RecognitionSettings::default());

        assert!(matches!(
            recognizer.try_recognize(&RgbImage::new(0, 10)),
            Err(OcrError::InvalidInput(_))
        ));
        assert_eq!(recognizer.recognize(&RgbImage::new(10, 0)), "");
        // Too thin to keep any width at the target height
        assert!(matches!(
            recognizer.try_recognize(&RgbImage::new(1, 500)),
            Err(OcrError::InvalidInput(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_inference_failure_yields_empty_string() {
        let mut recognizer = TextRecognizer::new(
            Box::new(ScriptedSession::failing()),
            dictionary(),
            RecognitionSettings::default(),
        );
        let region = RgbImage::new(30, 12);

        assert_eq!(recognizer.recognize(&region), "");
        assert!(matches!(
            recognizer.try_recognize(&region),
            Err(OcrError::Inference(_))
        ));
    }

    #[test]
    fn test_malformed_output_shape() {
        let session = ScriptedSession::new(|_, _| {
            Ok(ModelOutput {
                shape: vec![1, 1, 4, 7],
                data: vec![0.0; 28],
            })
        });
        let mut recognizer =
            TextRecognizer::new(Box::new(session), dictionary(), RecognitionSettings::default());

        assert!(matches!(
            recognizer.try_recognize(&RgbImage::new(30, 12)),
            Err(OcrError::Inference(_))
        ));
    }

    #[test]
    fn test_shape_cache_and_identical_results() {
        // Emits class = 1 + (sum of input > threshold) so output depends on pixels
        let session = ScriptedSession::new(|input: &[f32], shape: &TensorShape| {
            let mean = input.iter().sum::<f32>() / input.len() as f32;
            let class = if mean > 0.5 { 2 } else { 1 };
            let steps = shape.dims()[3] / 4;
            Ok(ModelOutput {
                shape: vec![1, steps, 7],
                data: one_hot(&vec![class; steps], 7),
            })
        });
        let mut recognizer =
            TextRecognizer::new(Box::new(session), dictionary(), RecognitionSettings::default());
        let bright = RgbImage::from_pixel(64, 48, Rgb([250, 250, 250]));
        let dark = RgbImage::from_pixel(64, 48, Rgb([5, 5, 5]));

        let first = recognizer.recognize(&bright);
        assert_eq!(recognizer.recognize(&dark), "A");
        assert_eq!(recognizer.shape_rebuilds(), 1);

        // Wider region forces a new descriptor
        recognizer.recognize(&RgbImage::from_pixel(128, 48, Rgb([250, 250, 250])));
        assert_eq!(recognizer.shape_rebuilds(), 2);

        let again = recognizer.recognize(&bright);
        assert_eq!(recognizer.shape_rebuilds(), 3);
        assert_eq!(first, "B");
        assert_eq!(first, again);
    }
}
