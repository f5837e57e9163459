//! Storage Layer
//!
//! Persists image analyses in SQLite and discovers images on disk.

pub mod database;
pub mod scanner;

pub use database::{ImageRecord, ImageSource, SqliteStore, Statistics};
pub use scanner::{content_hash, find_new_images, scan_folder, NewImage};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::analysis::Emotion;
use crate::processor::ImageAnalysis;

/// Database file name inside the data directory
pub const DATABASE_FILENAME: &str = "memes.db";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "memefinder", "MemeFinder")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Default database location
pub fn default_database_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DATABASE_FILENAME))
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown emotion label in database: {0}")]
    InvalidEmotion(String),
}

/// An image waiting for analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub id: i64,
    pub path: PathBuf,
}

/// Analysis results for one stored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub image_id: i64,
    pub ocr_text: String,
    pub filtered_text: String,
    pub emotion: Emotion,
    pub pos_score: f64,
    pub neg_score: f64,
}

impl AnalysisRecord {
    pub fn from_analysis(image_id: i64, analysis: ImageAnalysis) -> Self {
        Self {
            image_id,
            ocr_text: analysis.ocr_text,
            filtered_text: analysis.filtered_text,
            emotion: analysis.emotion,
            pos_score: analysis.emotion_positive,
            neg_score: analysis.emotion_negative,
        }
    }
}

/// Where analyses are read from and written to
pub trait PersistenceGateway: Send + Sync {
    /// Store one analysis and mark the image processed
    fn record(&self, record: &AnalysisRecord) -> Result<(), StorageError>;

    /// Store several analyses atomically
    fn record_batch(&self, records: &[AnalysisRecord]) -> Result<(), StorageError>;

    /// Up to `limit` images not yet processed
    fn next_unprocessed(&self, limit: usize) -> Result<Vec<PendingImage>, StorageError>;
}
