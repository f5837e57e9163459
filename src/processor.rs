//! Meme Processor
//!
//! Turns one image into searchable text plus a sentiment tag.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::analysis::{Emotion, EmotionClassifier, KeywordClassifier, TextFilter};
use crate::vision::padding::DEFAULT_PAD_RATIO;
use crate::vision::{DeviceState, OcrPipeline, RecognitionResult};

/// Everything stored about an analyzed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    /// Recognized text, lines joined by a single space
    pub ocr_text: String,
    /// `ocr_text` without URLs and watermarks
    pub filtered_text: String,
    pub emotion: Emotion,
    pub emotion_positive: f64,
    pub emotion_negative: f64,
}

impl ImageAnalysis {
    pub fn empty() -> Self {
        Self {
            ocr_text: String::new(),
            filtered_text: String::new(),
            emotion: Emotion::Unclassified,
            emotion_positive: 0.0,
            emotion_negative: 0.0,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.ocr_text.is_empty()
    }
}

impl Default for ImageAnalysis {
    fn default() -> Self {
        Self::empty()
    }
}

/// OCR, filtering and sentiment for a single image
pub struct MemeProcessor {
    pipeline: OcrPipeline,
    filter: TextFilter,
    classifier: Box<dyn EmotionClassifier>,
    pad_ratio: f64,
}

impl MemeProcessor {
    pub fn new(pipeline: OcrPipeline) -> Self {
        Self {
            pipeline,
            filter: TextFilter::default(),
            classifier: Box::new(KeywordClassifier),
            pad_ratio: DEFAULT_PAD_RATIO,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn EmotionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_filter(mut self, filter: TextFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Pad ratio used by [`process_image`](Self::process_image)
    pub fn with_pad_ratio(mut self, pad_ratio: f64) -> Self {
        self.pad_ratio = pad_ratio;
        self
    }

    pub fn device(&self) -> DeviceState {
        self.pipeline.device()
    }

    pub fn pipeline(&self) -> &OcrPipeline {
        &self.pipeline
    }

    /// Analyze with the configured pad ratio
    pub fn process_image(&self, path: &Path) -> ImageAnalysis {
        self.process(path, self.pad_ratio)
    }

    /// Analyze `path`. Never fails; an image the pipeline cannot read yields
    /// [`ImageAnalysis::empty`].
    pub fn process(&self, path: &Path, pad_ratio: f64) -> ImageAnalysis {
        self.analyze(&self.pipeline.process(path, pad_ratio))
    }

    /// Filter and classify the text of an existing recognition result
    pub fn analyze(&self, result: &RecognitionResult) -> ImageAnalysis {
        let path = &result.image;
        let ocr_text = result.text();
        if ocr_text.is_empty() {
            debug!("No text in {:?}", path);
            return ImageAnalysis::empty();
        }

        let filtered_text = self.filter.filter(&ocr_text);
        let score = self.classifier.classify(&filtered_text);
        debug!(
            "{:?}: {} ({} via {})",
            path,
            filtered_text,
            score.emotion,
            self.classifier.name()
        );

        ImageAnalysis {
            ocr_text,
            filtered_text,
            emotion: score.emotion,
            emotion_positive: score.positive,
            emotion_negative: score.negative,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analysis::EmotionScore;
    use crate::vision::engine::{BackendError, EngineInput, OcrBackend, PredictOptions};
    use crate::vision::OcrAdapter;
    use image::RgbImage;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    /// Always answers with the same raw payload
    pub(crate) struct StaticBackend(pub Value);

    impl OcrBackend for StaticBackend {
        fn name(&self) -> &'static str {
            "static"
        }

        fn predict(
            &self,
            _input: &EngineInput,
            _options: Option<&PredictOptions>,
        ) -> Result<Option<Value>, BackendError> {
            Ok(Some(self.0.clone()))
        }
    }

    pub(crate) fn processor_with(raw: Value) -> MemeProcessor {
        let adapter = OcrAdapter::new(Box::new(StaticBackend(raw)), DeviceState::Cpu);
        MemeProcessor::new(OcrPipeline::new(adapter))
    }

    pub(crate) fn write_image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(50, 40, image::Rgb([200, 200, 200]))
            .save(&path)
            .unwrap();
        path
    }

    fn two_lines(first: &str, second: &str) -> Value {
        json!({
            "rec_texts": [first, second],
            "rec_polys": [
                [[5, 5], [20, 5], [20, 10], [5, 10]],
                [[5, 20], [20, 20], [20, 30], [5, 30]]
            ],
            "rec_scores": [0.9, 0.8]
        })
    }

    #[test]
    fn test_process_joins_filters_and_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "happy.png");
        let processor = processor_with(two_lines("哈哈 笑死我了", "抖音 www.meme.com"));

        let analysis = processor.process(&image, 0.10);

        assert_eq!(analysis.ocr_text, "哈哈 笑死我了 抖音 www.meme.com");
        assert_eq!(analysis.filtered_text, "哈哈 笑死我了");
        assert_eq!(analysis.emotion, Emotion::Positive);
        assert!((analysis.emotion_positive - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_process_skips_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "blank.png");
        let processor = processor_with(two_lines("", "今天星期三"));

        let analysis = processor.process_image(&image);
        assert_eq!(analysis.ocr_text, "今天星期三");
        assert_eq!(analysis.emotion, Emotion::Neutral);
    }

    #[test]
    fn test_process_missing_file_is_empty() {
        let processor = processor_with(two_lines("a", "b"));
        let analysis = processor.process(Path::new("/no/such/meme.jpg"), 0.10);
        assert_eq!(analysis, ImageAnalysis::empty());
        assert!(!analysis.has_text());
    }

    #[test]
    fn test_process_uses_custom_classifier() {
        struct AlwaysNegative;

        impl EmotionClassifier for AlwaysNegative {
            fn name(&self) -> &str {
                "always-negative"
            }

            fn classify(&self, _text: &str) -> EmotionScore {
                EmotionScore {
                    emotion: Emotion::Negative,
                    positive: 0.2,
                    negative: 0.8,
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let image = write_image(dir.path(), "sad.png");
        let processor =
            processor_with(two_lines("开心", "快乐")).with_classifier(Box::new(AlwaysNegative));

        let analysis = processor.process_image(&image);
        assert_eq!(analysis.emotion, Emotion::Negative);
        assert_eq!(analysis.emotion_negative, 0.8);
    }
}
