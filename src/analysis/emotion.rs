//! Sentiment tagging
//!
//! Two classifiers share one output shape: a lexicon counter, and a wrapper
//! around any scoring model that falls back to the lexicon when the model
//! has no answer.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const POSITIVE_WORDS: [&str; 18] = [
    "开心", "快乐", "高兴", "喜欢", "爱", "好", "棒", "赞", "哈哈", "笑", "牛", "强", "优秀", "完美",
    "美好", "幸福", "温暖", "可爱",
];

const NEGATIVE_WORDS: [&str; 17] = [
    "难过", "伤心", "生气", "讨厌", "恨", "差", "烂", "哭", "呜呜", "痛", "累", "烦", "糟", "坏",
    "丑", "悲伤", "失望",
];

/// Model scores above this are positive
pub const POSITIVE_THRESHOLD: f64 = 0.6;
/// Model scores below this are negative
pub const NEGATIVE_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Positive,
    Negative,
    Neutral,
    /// Too little text to judge
    Unclassified,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Positive => "positive",
            Emotion::Negative => "negative",
            Emotion::Neutral => "neutral",
            Emotion::Unclassified => "unclassified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(Emotion::Positive),
            "negative" => Some(Emotion::Negative),
            "neutral" => Some(Emotion::Neutral),
            "unclassified" => Some(Emotion::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label plus positive/negative confidences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub emotion: Emotion,
    pub positive: f64,
    pub negative: f64,
}

impl EmotionScore {
    pub fn unclassified() -> Self {
        Self {
            emotion: Emotion::Unclassified,
            positive: 0.0,
            negative: 0.0,
        }
    }

    pub fn neutral() -> Self {
        Self {
            emotion: Emotion::Neutral,
            positive: 0.5,
            negative: 0.5,
        }
    }
}

pub trait EmotionClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, text: &str) -> EmotionScore;
}

/// Counts lexicon hits and lets the larger side win
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn hits(text: &str, words: &[&str]) -> usize {
        words.iter().filter(|word| text.contains(*word)).count()
    }
}

impl EmotionClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, text: &str) -> EmotionScore {
        let text = text.trim();
        if text.chars().count() < 2 {
            return EmotionScore::unclassified();
        }

        let text = text.to_lowercase();
        let positive = Self::hits(&text, &POSITIVE_WORDS);
        let negative = Self::hits(&text, &NEGATIVE_WORDS);

        let confidence = |hits: usize| (0.5 + 0.1 * hits as f64).min(0.9);

        if positive > negative {
            let score = confidence(positive);
            EmotionScore {
                emotion: Emotion::Positive,
                positive: score,
                negative: 1.0 - score,
            }
        } else if negative > positive {
            let score = confidence(negative);
            EmotionScore {
                emotion: Emotion::Negative,
                positive: 1.0 - score,
                negative: score,
            }
        } else {
            EmotionScore::neutral()
        }
    }
}

/// Wraps a model returning P(positive) in [0, 1]. `None` from the model
/// means it could not score the text; the lexicon takes over.
pub struct ModelClassifier<F> {
    model: F,
    fallback: KeywordClassifier,
}

impl<F> ModelClassifier<F>
where
    F: Fn(&str) -> Option<f64> + Send + Sync,
{
    pub fn new(model: F) -> Self {
        Self {
            model,
            fallback: KeywordClassifier,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl<F> EmotionClassifier for ModelClassifier<F>
where
    F: Fn(&str) -> Option<f64> + Send + Sync,
{
    fn name(&self) -> &str {
        "model"
    }

    fn classify(&self, text: &str) -> EmotionScore {
        if text.trim().is_empty() {
            return EmotionScore::unclassified();
        }

        let score = match (self.model)(text) {
            Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
            _ => {
                debug!("Sentiment model gave no score, using keywords");
                return self.fallback.classify(text);
            }
        };

        let emotion = if score > POSITIVE_THRESHOLD {
            Emotion::Positive
        } else if score < NEGATIVE_THRESHOLD {
            Emotion::Negative
        } else {
            Emotion::Neutral
        };

        EmotionScore {
            emotion,
            positive: round4(score),
            negative: round4(1.0 - score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_positive() {
        let score = KeywordClassifier.classify("哈哈哈 太开心了");
        assert_eq!(score.emotion, Emotion::Positive);
        // 哈哈, 开心
        assert!((score.positive - 0.7).abs() < 1e-9);
        assert!((score.negative - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_negative_caps_confidence() {
        let score = KeywordClassifier.classify("难过 伤心 生气 讨厌 哭 累 烦");
        assert_eq!(score.emotion, Emotion::Negative);
        assert!((score.negative - 0.9).abs() < 1e-9);
        assert!((score.positive - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_tie_is_neutral() {
        assert_eq!(KeywordClassifier.classify("开心又难过"), EmotionScore::neutral());
        assert_eq!(KeywordClassifier.classify("今天星期三"), EmotionScore::neutral());
    }

    #[test]
    fn test_keyword_short_text_unclassified() {
        assert_eq!(KeywordClassifier.classify(" 好 "), EmotionScore::unclassified());
        assert_eq!(KeywordClassifier.classify(""), EmotionScore::unclassified());
    }

    #[test]
    fn test_model_thresholds() {
        let classifier = ModelClassifier::new(|text: &str| match text {
            "up" => Some(0.87654),
            "down" => Some(0.1),
            _ => Some(0.5),
        });

        let up = classifier.classify("up");
        assert_eq!(up.emotion, Emotion::Positive);
        assert_eq!(up.positive, 0.8765);
        assert_eq!(up.negative, 0.1235);

        assert_eq!(classifier.classify("down").emotion, Emotion::Negative);
        assert_eq!(classifier.classify("meh").emotion, Emotion::Neutral);
    }

    #[test]
    fn test_model_boundaries_are_neutral() {
        let high = ModelClassifier::new(|_: &str| Some(0.6));
        let low = ModelClassifier::new(|_: &str| Some(0.4));
        assert_eq!(high.classify("text").emotion, Emotion::Neutral);
        assert_eq!(low.classify("text").emotion, Emotion::Neutral);
    }

    #[test]
    fn test_model_falls_back_to_keywords() {
        let classifier = ModelClassifier::new(|_: &str| None);
        assert_eq!(classifier.classify("好开心").emotion, Emotion::Positive);

        let nan = ModelClassifier::new(|_: &str| Some(f64::NAN));
        assert_eq!(nan.classify("好烦 好累 好痛").emotion, Emotion::Negative);
    }

    #[test]
    fn test_model_empty_text() {
        let classifier = ModelClassifier::new(|_: &str| Some(0.9));
        assert_eq!(classifier.classify("  "), EmotionScore::unclassified());
    }

    #[test]
    fn test_emotion_round_trip_str() {
        for emotion in [
            Emotion::Positive,
            Emotion::Negative,
            Emotion::Neutral,
            Emotion::Unclassified,
        ] {
            assert_eq!(Emotion::parse(emotion.as_str()), Some(emotion));
        }
        assert_eq!(Emotion::parse("angry"), None);
    }
}
