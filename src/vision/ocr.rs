//! RapidOCR-style engine on ONNX Runtime
//!
//! DB text detection, optional 180 degree orientation correction and CTC
//! recognition over PP-OCR models. Output uses the RapidOCR raw shape
//! `[[box, text, score], ...], elapsed]`.

use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::{Array4, ArrayD, ArrayView1, ArrayView2, Axis, Ix2};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::device::{DeviceState, EngineFactory};
use super::engine::{BackendError, EngineInput, LimitType, OcrBackend, PredictOptions};
use super::models::{self, ModelPaths};
use super::preprocess::{self, PreprocessConfig};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct RapidOcrConfig {
    pub models: ModelPaths,
    pub intra_threads: usize,
    /// Pixel probability threshold for the detection bitmap
    pub det_thresh: f32,
    pub box_thresh: f32,
    pub unclip_ratio: f32,
    pub limit_side_len: u32,
    pub limit_type: LimitType,
    /// Boxes with a shorter side (in detector pixels) are dropped
    pub min_box_side: f32,
    pub max_candidates: usize,
    /// Recognitions below this score are dropped
    pub text_score: f32,
    pub cls_thresh: f32,
    pub use_textline_orientation: bool,
    pub rec_batch: usize,
}

impl RapidOcrConfig {
    pub fn new(models: ModelPaths) -> Self {
        Self {
            models,
            intra_threads: 4,
            det_thresh: 0.3,
            box_thresh: 0.5,
            unclip_ratio: 1.6,
            limit_side_len: 736,
            limit_type: LimitType::Min,
            min_box_side: 3.0,
            max_candidates: 1000,
            text_score: 0.5,
            cls_thresh: 0.9,
            use_textline_orientation: true,
            rec_batch: 6,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }
}

/// Axis-aligned text box in original image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    /// Mean detector probability inside the region
    pub score: f32,
}

impl TextBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Corners clockwise from top-left as `[[x, y]; 4]`
    pub fn corners(&self) -> Value {
        json!([
            [self.x0, self.y0],
            [self.x1, self.y0],
            [self.x1, self.y1],
            [self.x0, self.y1]
        ])
    }
}

/// DB post-processing parameters
#[derive(Debug, Clone, Copy)]
struct BoxExtractor {
    det_thresh: f32,
    box_thresh: f32,
    unclip_ratio: f32,
    min_side: f32,
    max_candidates: usize,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    prob_sum: f32,
    pixels: u32,
}

impl BoxExtractor {
    /// Turn a `[H, W]` probability map into boxes scaled to `image_size`
    fn extract(&self, prob: ArrayView2<'_, f32>, image_size: (u32, u32)) -> Vec<TextBox> {
        let (map_h, map_w) = prob.dim();
        if map_h == 0 || map_w == 0 {
            return Vec::new();
        }

        let bitmap = GrayImage::from_fn(map_w as u32, map_h as u32, |x, y| {
            if prob[[y as usize, x as usize]] > self.det_thresh {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        let labels = connected_components(&bitmap, Connectivity::Eight, Luma([0u8]));

        let mut regions: BTreeMap<u32, Region> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let p = prob[[y as usize, x as usize]];
            regions
                .entry(label)
                .and_modify(|r| {
                    r.min_x = r.min_x.min(x);
                    r.min_y = r.min_y.min(y);
                    r.max_x = r.max_x.max(x);
                    r.max_y = r.max_y.max(y);
                    r.prob_sum += p;
                    r.pixels += 1;
                })
                .or_insert(Region {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                    prob_sum: p,
                    pixels: 1,
                });
        }

        let (image_w, image_h) = image_size;
        let scale_x = image_w as f32 / map_w as f32;
        let scale_y = image_h as f32 / map_h as f32;
        let max_x = (image_w as f32 - 1.0).max(0.0);
        let max_y = (image_h as f32 - 1.0).max(0.0);

        let mut boxes: Vec<TextBox> = regions
            .into_values()
            .take(self.max_candidates)
            .filter_map(|r| {
                let w = (r.max_x - r.min_x + 1) as f32;
                let h = (r.max_y - r.min_y + 1) as f32;
                if w.min(h) < self.min_side {
                    return None;
                }
                let score = r.prob_sum / r.pixels as f32;
                if score < self.box_thresh {
                    return None;
                }

                // Expand by area * ratio / perimeter on every side
                let distance = w * h * self.unclip_ratio / (2.0 * (w + h));
                if w.min(h) + 2.0 * distance < self.min_side + 2.0 {
                    return None;
                }
                let x0 = r.min_x as f32 - distance;
                let y0 = r.min_y as f32 - distance;
                let x1 = (r.max_x + 1) as f32 + distance;
                let y1 = (r.max_y + 1) as f32 + distance;

                Some(TextBox {
                    x0: (x0 * scale_x).round().clamp(0.0, max_x),
                    y0: (y0 * scale_y).round().clamp(0.0, max_y),
                    x1: (x1 * scale_x).round().clamp(0.0, max_x),
                    y1: (y1 * scale_y).round().clamp(0.0, max_y),
                    score,
                })
            })
            .filter(|b| b.width() >= 1.0 && b.height() >= 1.0)
            .collect();

        sort_reading_order(&mut boxes);
        boxes
    }
}

/// Top to bottom, then left to right for boxes on roughly the same line
fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            if (boxes[j + 1].y0 - boxes[j].y0).abs() < 10.0 && boxes[j + 1].x0 < boxes[j].x0 {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}

/// Cut a box out of the image; tall crops are rotated to horizontal
fn crop_box(image: &RgbImage, text_box: &TextBox) -> RgbImage {
    let x = text_box.x0.floor().max(0.0) as u32;
    let y = text_box.y0.floor().max(0.0) as u32;
    let w = (text_box.x1.ceil() as u32).saturating_sub(x).max(1);
    let h = (text_box.y1.ceil() as u32).saturating_sub(y).max(1);

    let crop = imageops::crop_imm(image, x, y, w, h).to_image();
    let (cw, ch) = crop.dimensions();
    if ch as f32 / cw.max(1) as f32 >= 1.5 {
        imageops::rotate270(&crop)
    } else {
        crop
    }
}

/// Greedy CTC decode of one `[T, C]` sequence
fn decode_sequence(view: ArrayView2<'_, f32>, dictionary: &[String]) -> (String, f32) {
    let use_probabilities = is_probability_tensor(&view);
    let dict_len = dictionary.len();

    let mut text = String::new();
    let mut prev_idx = usize::MAX;
    let mut confidence_sum = 0.0f32;
    let mut confidence_count = 0u32;

    for row in view.axis_iter(Axis(0)) {
        let (mut best_idx, mut best_val) = (0usize, f32::NEG_INFINITY);
        for (idx, &value) in row.iter().enumerate() {
            if value > best_val {
                best_val = value;
                best_idx = idx;
            }
        }

        let prob = if use_probabilities {
            best_val
        } else {
            softmax_at(&row, best_idx)
        };

        if best_idx != prev_idx && best_idx > 0 && best_idx <= dict_len {
            text.push_str(&dictionary[best_idx - 1]);
            confidence_sum += prob;
            confidence_count = confidence_count.saturating_add(1);
        }
        prev_idx = best_idx;
    }

    let confidence = if confidence_count > 0 {
        confidence_sum / confidence_count as f32
    } else {
        0.0
    };

    (text, confidence)
}

/// Decode a `[N, T, C]` recognizer output
fn decode_batch(output: &ArrayD<f32>, dictionary: &[String]) -> Result<Vec<(String, f32)>, BackendError> {
    let shape = output.shape();
    if shape.len() != 3 {
        return Err(BackendError::inference(format!(
            "unexpected recognizer output shape {:?}",
            shape
        )));
    }

    let classes = dictionary.len() + 1;
    (0..shape[0])
        .map(|b| {
            let view = output
                .index_axis(Axis(0), b)
                .into_dimensionality::<Ix2>()
                .map_err(|err| BackendError::inference(format!("bad recognizer output: {err}")))?;
            let view = if shape[2] != classes && shape[1] == classes {
                view.reversed_axes()
            } else {
                view
            };
            Ok(decode_sequence(view, dictionary))
        })
        .collect()
}

fn is_probability_tensor(view: &ArrayView2<'_, f32>) -> bool {
    let samples = view.shape()[0].min(3);
    for idx in 0..samples {
        let row = view.index_axis(Axis(0), idx);
        let mut sum = 0.0f32;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &value in row.iter() {
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        if min < -0.05 || max > 1.05 || (sum - 1.0).abs() > 0.05 {
            return false;
        }
    }
    true
}

fn softmax_at(row: &ArrayView1<'_, f32>, index: usize) -> f32 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|&value| (value - max).exp()).sum();
    if sum == 0.0 {
        return 0.0;
    }
    (row[index] - max).exp() / sum
}

/// Run a single-input session and copy out its first output
fn run_session(session: &Mutex<Session>, input: Array4<f32>) -> Result<ArrayD<f32>, BackendError> {
    let tensor = Tensor::from_array(input)
        .map_err(|err| BackendError::inference(format!("failed to build ORT tensor: {err}")))?;

    let mut session = session.lock();
    let outputs = session
        .run(ort::inputs![tensor])
        .map_err(|err| BackendError::inference(format!("ORT inference failed: {err}")))?;

    if outputs.len() == 0 {
        return Err(BackendError::inference("ORT returned no outputs"));
    }
    let array = outputs[0]
        .try_extract_array::<f32>()
        .map_err(|err| BackendError::inference(format!("failed to read ORT output: {err}")))?
        .to_owned();
    Ok(array)
}

/// Recognizer character list: embedded `character` metadata, else a
/// dictionary file. A trailing space class is appended.
fn load_dictionary(rec: &Session, path: Option<&Path>) -> Result<Vec<String>, BackendError> {
    let embedded = rec
        .metadata()
        .ok()
        .and_then(|meta| meta.custom("character").ok().flatten());

    let mut dictionary: Vec<String> = match (embedded, path) {
        (Some(chars), _) => chars.lines().map(str::to_string).collect(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|err| {
                BackendError::construction(format!(
                    "failed to read OCR dictionary {}: {err}",
                    path.display()
                ))
            })?
            .lines()
            .map(str::to_string)
            .collect(),
        (None, None) => {
            return Err(BackendError::construction(
                "recognition model has no embedded character list and no dictionary file was found",
            ))
        }
    };

    if dictionary.is_empty() {
        return Err(BackendError::construction("OCR dictionary is empty"));
    }
    dictionary.push(" ".to_string());
    Ok(dictionary)
}

/// Detector settings for one call
#[derive(Debug, Clone, Copy)]
struct CallSettings {
    limit_side_len: u32,
    limit_type: LimitType,
    extractor: BoxExtractor,
    use_textline_orientation: bool,
}

/// PP-OCR on ONNX Runtime
pub struct RapidOcrEngine {
    det: Mutex<Session>,
    rec: Mutex<Session>,
    cls: Option<Mutex<Session>>,
    dictionary: Vec<String>,
    config: RapidOcrConfig,
    preprocess: PreprocessConfig,
    device: DeviceState,
}

impl RapidOcrEngine {
    pub fn new(config: RapidOcrConfig, device: DeviceState) -> Result<Self, BackendError> {
        let threads = config.intra_threads;
        let det = models::build_session(&config.models.detection, device, threads)?;
        let rec = models::build_session(&config.models.recognition, device, threads)?;
        let cls = config
            .models
            .classifier
            .as_deref()
            .map(|path| models::build_session(path, device, threads))
            .transpose()?;
        let dictionary = load_dictionary(&rec, config.models.dictionary.as_deref())?;

        info!(
            "RapidOCR engine ready on {} ({} characters, orientation classifier: {})",
            device,
            dictionary.len(),
            cls.is_some()
        );

        Ok(Self {
            det: Mutex::new(det),
            rec: Mutex::new(rec),
            cls: cls.map(Mutex::new),
            dictionary,
            config,
            preprocess: PreprocessConfig::default(),
            device,
        })
    }

    pub fn device(&self) -> DeviceState {
        self.device
    }

    fn settings(&self, options: Option<&PredictOptions>) -> CallSettings {
        let mut settings = CallSettings {
            limit_side_len: self.config.limit_side_len,
            limit_type: self.config.limit_type,
            extractor: BoxExtractor {
                det_thresh: self.config.det_thresh,
                box_thresh: self.config.box_thresh,
                unclip_ratio: self.config.unclip_ratio,
                min_side: self.config.min_box_side,
                max_candidates: self.config.max_candidates,
            },
            use_textline_orientation: self.config.use_textline_orientation,
        };
        if let Some(options) = options {
            settings.limit_side_len = options.limit_side_len;
            settings.limit_type = options.limit_type;
            settings.extractor.box_thresh = options.box_thresh;
            settings.extractor.unclip_ratio = options.unclip_ratio;
            settings.use_textline_orientation = options.use_textline_orientation;
        }
        settings
    }

    fn run_image(&self, path: &Path, options: Option<&PredictOptions>) -> Result<Option<Value>, BackendError> {
        let started = Instant::now();
        let image = image::open(path)
            .map_err(|err| BackendError::inference(format!("failed to open {}: {err}", path.display())))?
            .to_rgb8();
        let settings = self.settings(options);

        let boxes = self.detect(&image, &settings)?;
        if boxes.is_empty() {
            debug!("No text regions in {:?}", path);
            return Ok(None);
        }

        let mut crops: Vec<RgbImage> = boxes.iter().map(|b| crop_box(&image, b)).collect();
        if settings.use_textline_orientation {
            if let Some(cls) = &self.cls {
                self.correct_orientation(cls, &mut crops)?;
            }
        }

        let recognized = self.recognize_crops(&crops)?;
        let lines: Vec<Value> = boxes
            .iter()
            .zip(recognized)
            .filter(|(_, (text, score))| !text.trim().is_empty() && *score >= self.config.text_score)
            .map(|(text_box, (text, score))| json!([text_box.corners(), text, score]))
            .collect();

        debug!(
            "{:?}: {} regions, {} lines in {:?}",
            path,
            boxes.len(),
            lines.len(),
            started.elapsed()
        );

        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(json!([lines, started.elapsed().as_secs_f64()])))
    }

    fn detect(&self, image: &RgbImage, settings: &CallSettings) -> Result<Vec<TextBox>, BackendError> {
        let input = preprocess::preprocess_for_detection(
            image,
            settings.limit_side_len,
            settings.limit_type,
            &self.preprocess,
        );
        let output = run_session(&self.det, input)?;

        let shape = output.shape().to_vec();
        let prob = match shape.as_slice() {
            [1, 1, _, _] => output
                .index_axis(Axis(0), 0)
                .index_axis_move(Axis(0), 0)
                .into_dimensionality::<Ix2>(),
            [1, _, _] => output.index_axis(Axis(0), 0).into_dimensionality::<Ix2>(),
            _ => {
                return Err(BackendError::inference(format!(
                    "unexpected detector output shape {:?}",
                    shape
                )))
            }
        }
        .map_err(|err| BackendError::inference(format!("bad detector output: {err}")))?;

        Ok(settings.extractor.extract(prob, image.dimensions()))
    }

    /// Rotate crops the classifier reads as upside down
    fn correct_orientation(&self, cls: &Mutex<Session>, crops: &mut [RgbImage]) -> Result<(), BackendError> {
        let batch_size = self.config.rec_batch.max(1);
        for start in (0..crops.len()).step_by(batch_size) {
            let end = (start + batch_size).min(crops.len());
            let batch: Vec<&RgbImage> = crops[start..end].iter().collect();
            let tensor = preprocess::preprocess_for_classification(&batch, &self.preprocess);
            let output = run_session(cls, tensor)?;
            let shape = output.shape().to_vec();
            let output = output
                .into_dimensionality::<Ix2>()
                .ok()
                .filter(|probs| probs.ncols() >= 2 && probs.nrows() == end - start)
                .ok_or_else(|| {
                    BackendError::inference(format!("unexpected classifier output shape {:?}", shape))
                })?;

            for (offset, crop) in crops[start..end].iter_mut().enumerate() {
                let upright = output[[offset, 0]];
                let flipped = output[[offset, 1]];
                if flipped > upright && flipped >= self.config.cls_thresh {
                    *crop = imageops::rotate180(crop);
                }
            }
        }
        Ok(())
    }

    /// Recognize crops in batches of similar aspect ratio
    fn recognize_crops(&self, crops: &[RgbImage]) -> Result<Vec<(String, f32)>, BackendError> {
        let mut order: Vec<usize> = (0..crops.len()).collect();
        order.sort_by(|&a, &b| {
            preprocess::aspect_ratio(&crops[a]).total_cmp(&preprocess::aspect_ratio(&crops[b]))
        });

        let mut results = vec![(String::new(), 0.0f32); crops.len()];
        for chunk in order.chunks(self.config.rec_batch.max(1)) {
            let batch: Vec<&RgbImage> = chunk.iter().map(|&i| &crops[i]).collect();
            let tensor = preprocess::preprocess_for_recognition(&batch, &self.preprocess);
            let output = run_session(&self.rec, tensor)?;
            let decoded = decode_batch(&output, &self.dictionary)?;
            for (&idx, item) in chunk.iter().zip(decoded) {
                results[idx] = item;
            }
        }
        Ok(results)
    }
}

impl OcrBackend for RapidOcrEngine {
    fn name(&self) -> &'static str {
        "rapidocr_onnx"
    }

    fn predict(
        &self,
        input: &EngineInput,
        options: Option<&PredictOptions>,
    ) -> Result<Option<Value>, BackendError> {
        match input {
            EngineInput::Path(path) => self.run_image(path, options),
            EngineInput::Batch(paths) => {
                let results = paths
                    .iter()
                    .map(|path| Ok(self.run_image(path, options)?.unwrap_or(Value::Null)))
                    .collect::<Result<Vec<Value>, BackendError>>()?;
                Ok(Some(Value::Array(results)))
            }
        }
    }
}

/// Builds [`RapidOcrEngine`]s for the device selector
#[derive(Debug, Clone)]
pub struct OrtEngineFactory {
    config: RapidOcrConfig,
}

impl OrtEngineFactory {
    pub fn new(config: RapidOcrConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for OrtEngineFactory {
    fn accelerator_available(&self) -> bool {
        models::accelerator_available()
    }

    fn build(&self, device: DeviceState) -> Result<Box<dyn OcrBackend>, BackendError> {
        Ok(Box::new(RapidOcrEngine::new(self.config.clone(), device)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn extractor() -> BoxExtractor {
        BoxExtractor {
            det_thresh: 0.3,
            box_thresh: 0.5,
            unclip_ratio: 1.6,
            min_side: 3.0,
            max_candidates: 1000,
        }
    }

    fn fill(map: &mut Array2<f32>, x0: usize, y0: usize, x1: usize, y1: usize, value: f32) {
        for y in y0..y1 {
            for x in x0..x1 {
                map[[y, x]] = value;
            }
        }
    }

    #[test]
    fn test_extract_finds_separate_regions() {
        let mut map = Array2::<f32>::zeros((64, 64));
        fill(&mut map, 40, 10, 60, 20, 0.9);
        fill(&mut map, 4, 12, 24, 22, 0.8);
        fill(&mut map, 10, 40, 50, 50, 0.95);

        let boxes = extractor().extract(map.view(), (64, 64));

        assert_eq!(boxes.len(), 3);
        // Same line, so left box first
        assert!(boxes[0].x0 < boxes[1].x0);
        assert!(boxes[2].y0 > boxes[1].y0);
        // Expanded beyond the raw region
        assert!(boxes[2].x0 < 10.0);
        assert!(boxes[2].x1 > 50.0);
        assert!(boxes.iter().all(|b| b.x1 <= 63.0 && b.y1 <= 63.0));
    }

    #[test]
    fn test_extract_scales_to_image_size() {
        let mut map = Array2::<f32>::zeros((32, 32));
        fill(&mut map, 8, 8, 24, 16, 0.9);

        let boxes = extractor().extract(map.view(), (320, 320));
        assert_eq!(boxes.len(), 1);
        assert!(boxes[0].x0 < 80.0);
        assert!(boxes[0].x1 > 240.0);
    }

    #[test]
    fn test_extract_drops_weak_and_tiny_regions() {
        let mut map = Array2::<f32>::zeros((40, 40));
        // Above the pixel threshold but below the box threshold
        fill(&mut map, 2, 2, 30, 10, 0.4);
        // Too thin
        fill(&mut map, 2, 30, 30, 32, 0.99);

        assert!(extractor().extract(map.view(), (40, 40)).is_empty());
    }

    #[test]
    fn test_decode_sequence_collapses_repeats_and_blanks() {
        let dictionary: Vec<String> = ["a", "b", " "].iter().map(|s| s.to_string()).collect();
        // Classes: blank, a, b, space
        let probs = Array2::from_shape_vec(
            (6, 4),
            vec![
                0.1, 0.9, 0.0, 0.0, // a
                0.1, 0.9, 0.0, 0.0, // a (repeat)
                0.9, 0.1, 0.0, 0.0, // blank
                0.1, 0.8, 0.1, 0.0, // a
                0.0, 0.0, 1.0, 0.0, // b
                0.0, 0.0, 0.0, 1.0, // space
            ],
        )
        .unwrap();

        let (text, confidence) = decode_sequence(probs.view(), &dictionary);
        assert_eq!(text, "aab ");
        assert!(confidence > 0.8 && confidence <= 1.0);
    }

    #[test]
    fn test_decode_sequence_all_blank() {
        let dictionary = vec!["x".to_string()];
        let probs = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(decode_sequence(probs.view(), &dictionary), (String::new(), 0.0));
    }

    #[test]
    fn test_decode_batch_rejects_bad_rank() {
        let output = ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 3]));
        assert!(decode_batch(&output, &["a".to_string()]).is_err());
    }

    #[test]
    fn test_decode_batch_handles_each_item() {
        let dictionary = vec!["x".to_string(), "y".to_string()];
        let output = ArrayD::from_shape_vec(
            ndarray::IxDyn(&[2, 1, 3]),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        )
        .unwrap();
        let decoded = decode_batch(&output, &dictionary).unwrap();
        assert_eq!(decoded[0].0, "x");
        assert_eq!(decoded[1].0, "y");
    }

    #[test]
    fn test_softmax_of_logits() {
        let row = ndarray::arr1(&[0.0f32, 0.0]);
        assert!((softmax_at(&row.view(), 1) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_crop_box_rotates_tall_regions() {
        let image = RgbImage::new(100, 100);
        let tall = TextBox { x0: 10.0, y0: 10.0, x1: 20.0, y1: 60.0, score: 1.0 };
        let wide = TextBox { x0: 10.0, y0: 10.0, x1: 60.0, y1: 20.0, score: 1.0 };

        assert_eq!(crop_box(&image, &tall).dimensions(), (50, 10));
        assert_eq!(crop_box(&image, &wide).dimensions(), (50, 10));
    }

    #[test]
    fn test_text_box_corners_shape() {
        let b = TextBox { x0: 1.0, y0: 2.0, x1: 3.0, y1: 4.0, score: 0.9 };
        assert_eq!(b.corners(), json!([[1.0, 2.0], [3.0, 2.0], [3.0, 4.0], [1.0, 4.0]]));
    }
}
