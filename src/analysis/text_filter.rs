//! Watermark and URL stripping for OCR text

use regex::Regex;
use std::sync::LazyLock;

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)https?://\S+",
        r"(?i)www\.\S+",
        r"(?i)[a-z0-9-]+\.(?:com|cn|net|org|cc|tv|info|top|xyz|vip)\S*",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("URL pattern is valid"))
    .collect()
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\-|]{3,}").expect("separator pattern is valid"));

/// Watermark words and platform names commonly burned into memes
pub const WATERMARK_KEYWORDS: [&str; 16] = [
    "微信",
    "wechat",
    "WeChat",
    "抖音",
    "douyin",
    "tiktok",
    "TikTok",
    "快手",
    "kuaishou",
    "小红书",
    "xiaohongshu",
    "水印",
    "原创",
    "版权",
    "@",
    "#",
];

/// Removes URLs, watermark words and separator noise
#[derive(Debug, Clone)]
pub struct TextFilter {
    keywords: Vec<String>,
}

impl Default for TextFilter {
    fn default() -> Self {
        Self {
            keywords: WATERMARK_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl TextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add extra watermark words
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn filter(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut text = text.to_string();
        for pattern in URL_PATTERNS.iter() {
            text = pattern.replace_all(&text, "").into_owned();
        }

        for keyword in &self.keywords {
            text = text.replace(keyword.as_str(), "");
        }

        let text = WHITESPACE.replace_all(&text, " ");
        let text = SEPARATOR_RUNS.replace_all(&text, "");
        text.trim().to_string()
    }
}
