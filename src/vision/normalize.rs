//! Raw OCR output normalization
//!
//! Different engines (and different versions of the same engine) report
//! detections in very different shapes. Each known shape is a parser over a
//! `serde_json::Value`; they are tried in a fixed order and the first one that
//! matches wins.

use serde_json::{Map, Value};
use tracing::debug;

use super::{Detection, Point};

const BOX_KEYS: [&str; 5] = ["box", "bbox", "points", "poly", "det"];
const TEXT_KEYS: [&str; 3] = ["text", "transcription", "label"];
const SCORE_KEYS: [&str; 3] = ["score", "confidence", "prob"];

/// Raw output layouts understood by [`normalize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawShape {
    /// `{rec_texts, rec_polys | dt_polys, rec_scores?}` somewhere in the tree
    ParallelArrays,
    /// `[[box, [text, score]], ...]`, optionally wrapped in one extra list
    BoxTextPairs,
    /// `[boxes, recognitions]` zipped to the shorter length
    ZippedLists,
    /// List of mappings with aliased box/text/score fields
    Records,
    /// `[[box, text, score], ...]`, optionally as `[triples, elapsed]`
    FlatTriples,
}

type ShapeParser = fn(&Value) -> Vec<Detection>;

const FALLBACK_PARSERS: [(RawShape, ShapeParser); 4] = [
    (RawShape::BoxTextPairs, from_pairs),
    (RawShape::ZippedLists, from_zipped),
    (RawShape::Records, from_records),
    (RawShape::FlatTriples, from_triples),
];

/// Extract detections from any supported raw output. Never panics; unknown
/// shapes yield an empty list.
pub fn normalize(raw: Option<&Value>) -> Vec<Detection> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    match classify(raw) {
        Some((shape, items)) => {
            debug!("Normalized {} detections from {:?} output", items.len(), shape);
            items
        }
        None => {
            debug!("Raw OCR output did not match any known shape");
            Vec::new()
        }
    }
}

/// Identify the shape of `raw` and parse it.
///
/// A parallel-array block is authoritative once found, even if it holds no
/// valid boxes. The remaining shapes only match when they produce at least
/// one detection.
pub fn classify(raw: &Value) -> Option<(RawShape, Vec<Detection>)> {
    if let Some(block) = find_parallel_block(raw) {
        return Some((RawShape::ParallelArrays, from_parallel_block(block)));
    }

    FALLBACK_PARSERS.iter().find_map(|(shape, parse)| {
        let items = parse(raw);
        (!items.is_empty()).then_some((*shape, items))
    })
}

/// Loose truthiness: null, false, zero and empty containers are falsy
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn is_parallel_block(map: &Map<String, Value>) -> bool {
    map.contains_key("rec_texts")
        && (map.contains_key("rec_polys") || map.contains_key("dt_polys"))
}

fn find_parallel_block(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(res)) = map.get("res") {
                if is_parallel_block(res) {
                    return Some(res);
                }
            }
            if is_parallel_block(map) {
                return Some(map);
            }
            map.values().find_map(find_parallel_block)
        }
        Value::Array(items) => items.iter().find_map(find_parallel_block),
        _ => None,
    }
}

fn from_parallel_block(block: &Map<String, Value>) -> Vec<Detection> {
    let texts = array_or_empty(block.get("rec_texts"));
    let scores = array_or_empty(block.get("rec_scores"));
    let polys = array_or_empty(first_truthy(block, &["rec_polys", "dt_polys"]));

    texts
        .iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let bbox = parse_box(polys.get(i)?)?;
            let score = scores.get(i).and_then(Value::as_f64).unwrap_or(0.0);
            Some(Detection::new(bbox, value_to_text(text), score))
        })
        .collect()
}

fn from_pairs(raw: &Value) -> Vec<Detection> {
    let Some(lines) = raw.as_array() else {
        return Vec::new();
    };

    // One extra list layer: [[[box, [text, score]], ...]]
    if let Some(Value::Array(first)) = lines.first() {
        if matches!(first.first(), Some(Value::Array(_))) {
            let items = pairs_from_lines(first);
            if !items.is_empty() {
                return items;
            }
        }
    }

    pairs_from_lines(lines)
}

fn pairs_from_lines(lines: &[Value]) -> Vec<Detection> {
    lines
        .iter()
        .filter_map(|line| {
            let parts = line.as_array().filter(|parts| parts.len() >= 2)?;
            let bbox = parse_box(&parts[0])?;
            let (text, score) = parse_text_score(&parts[1])?;
            Some(Detection::new(bbox, text, score))
        })
        .collect()
}

fn from_zipped(raw: &Value) -> Vec<Detection> {
    let Some([Value::Array(boxes), Value::Array(recognitions)]) =
        raw.as_array().map(Vec::as_slice)
    else {
        return Vec::new();
    };

    boxes
        .iter()
        .zip(recognitions)
        .filter_map(|(bbox, rec)| {
            let bbox = parse_box(bbox)?;
            let (text, score) = parse_text_score(rec)?;
            Some(Detection::new(bbox, text, score))
        })
        .collect()
}

fn from_records(raw: &Value) -> Vec<Detection> {
    let records = match raw {
        Value::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };

    records
        .iter()
        .filter_map(|record| {
            let map = record.as_object()?;
            let bbox = first_truthy(map, &BOX_KEYS).and_then(parse_box)?;

            let rec = map.get("rec").filter(|v| is_truthy(v)).and_then(parse_text_score);
            let (text, score) = match rec {
                Some(pair) => pair,
                None => {
                    let text = first_truthy(map, &TEXT_KEYS)?.as_str()?.to_string();
                    let score = first_truthy(map, &SCORE_KEYS)
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    (text, score)
                }
            };
            Some(Detection::new(bbox, text, score))
        })
        .collect()
}

fn from_triples(raw: &Value) -> Vec<Detection> {
    let Some(outer) = raw.as_array() else {
        return Vec::new();
    };

    // RapidOCR returns (lines, elapsed) where elapsed is a float or a list of floats
    let lines = match outer.as_slice() {
        [Value::Array(lines), elapsed] if elapsed.is_number() || elapsed.is_array() => {
            lines.as_slice()
        }
        _ => outer.as_slice(),
    };

    lines
        .iter()
        .filter_map(|line| {
            let parts = line.as_array().filter(|parts| parts.len() >= 2)?;
            let bbox = parse_box(&parts[0])?;
            let text = match &parts[1] {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            let score = parts.get(2).and_then(Value::as_f64).unwrap_or(0.0);
            Some(Detection::new(bbox, text, score))
        })
        .collect()
}

/// A box is exactly four numeric `[x, y]` points
fn parse_box(value: &Value) -> Option<[Point; 4]> {
    let points = value.as_array().filter(|points| points.len() == 4)?;
    let mut bbox = [Point::default(); 4];
    for (slot, point) in bbox.iter_mut().zip(points) {
        *slot = parse_point(point)?;
    }
    Some(bbox)
}

fn parse_point(value: &Value) -> Option<Point> {
    match value.as_array()?.as_slice() {
        [x, y] => {
            let (x, y) = (x.as_f64()?, y.as_f64()?);
            (x.is_finite() && y.is_finite()).then_some(Point::new(x, y))
        }
        _ => None,
    }
}

/// `[text, score, ...]` with a string text and a numeric score
fn parse_text_score(value: &Value) -> Option<(String, f64)> {
    match value.as_array()?.as_slice() {
        [Value::String(text), score, ..] => Some((text.clone(), score.as_f64()?)),
        _ => None,
    }
}

fn first_truthy<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| is_truthy(value))
}

fn array_or_empty(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
