//! Text Analysis
//!
//! Cleans OCR text and tags it with a coarse sentiment.

pub mod emotion;
pub mod text_filter;

pub use emotion::{Emotion, EmotionClassifier, EmotionScore, KeywordClassifier, ModelClassifier};
pub use text_filter::TextFilter;
