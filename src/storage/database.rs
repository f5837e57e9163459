//! SQLite database for persistent storage

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{AnalysisRecord, PendingImage, PersistenceGateway, StorageError};
use crate::analysis::Emotion;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS image_sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    folder_path TEXT UNIQUE NOT NULL,
    added_time TEXT NOT NULL DEFAULT (datetime('now')),
    last_scan_time TEXT,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT UNIQUE NOT NULL,
    file_hash TEXT NOT NULL,
    source_id INTEGER REFERENCES image_sources(id),
    ocr_text TEXT,
    filtered_text TEXT,
    emotion TEXT,
    emotion_positive REAL,
    emotion_negative REAL,
    added_time TEXT NOT NULL DEFAULT (datetime('now')),
    processed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_file_hash ON images(file_hash);
CREATE INDEX IF NOT EXISTS idx_emotion ON images(emotion);
CREATE INDEX IF NOT EXISTS idx_processed ON images(processed);
";

/// Maximum rows returned by [`SqliteStore::search`]
pub const SEARCH_LIMIT: usize = 100;

/// A folder registered for scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    pub id: i64,
    pub folder_path: PathBuf,
    pub added_time: String,
    pub last_scan_time: Option<String>,
    pub enabled: bool,
}

/// A processed image as returned by search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub file_path: PathBuf,
    pub ocr_text: String,
    pub filtered_text: String,
    pub emotion: Option<Emotion>,
    pub emotion_positive: f64,
    pub emotion_negative: f64,
    pub added_time: String,
}

/// Image counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    /// Processed images per emotion label
    pub emotions: BTreeMap<String, u64>,
}

/// Database connection wrapper
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        info!("Opened database {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Register a folder. Returns false if it is already registered.
    pub fn add_source(&self, folder: &Path) -> Result<bool, StorageError> {
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO image_sources (folder_path) VALUES (?1)",
            params![path_text(folder)],
        )?;
        Ok(inserted == 1)
    }

    pub fn source_id(&self, folder: &Path) -> Result<Option<i64>, StorageError> {
        let id = self
            .conn
            .lock()
            .query_row(
                "SELECT id FROM image_sources WHERE folder_path = ?1",
                params![path_text(folder)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Registered folders, newest first
    pub fn sources(&self) -> Result<Vec<ImageSource>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, folder_path, added_time, last_scan_time, enabled
             FROM image_sources ORDER BY added_time DESC, id DESC",
        )?;

        let sources = stmt
            .query_map([], |row| {
                Ok(ImageSource {
                    id: row.get(0)?,
                    folder_path: PathBuf::from(row.get::<_, String>(1)?),
                    added_time: row.get(2)?,
                    last_scan_time: row.get(3)?,
                    enabled: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    /// Remove a folder and every image discovered in it
    pub fn remove_source(&self, source_id: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let images = tx.execute("DELETE FROM images WHERE source_id = ?1", params![source_id])?;
        tx.execute("DELETE FROM image_sources WHERE id = ?1", params![source_id])?;
        tx.commit()?;
        debug!("Removed source {} with {} images", source_id, images);
        Ok(())
    }

    pub fn toggle_source(&self, source_id: i64, enabled: bool) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "UPDATE image_sources SET enabled = ?1 WHERE id = ?2",
            params![enabled as i64, source_id],
        )?;
        Ok(())
    }

    pub fn update_scan_time(&self, source_id: i64) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "UPDATE image_sources SET last_scan_time = datetime('now') WHERE id = ?1",
            params![source_id],
        )?;
        Ok(())
    }

    /// Add a discovered image. Returns false if the path is already stored.
    pub fn add_image(
        &self,
        path: &Path,
        hash: &str,
        source_id: Option<i64>,
    ) -> Result<bool, StorageError> {
        let inserted = self.conn.lock().execute(
            "INSERT OR IGNORE INTO images (file_path, file_hash, source_id) VALUES (?1, ?2, ?3)",
            params![path_text(path), hash, source_id],
        )?;
        Ok(inserted == 1)
    }

    /// Content hashes already stored, optionally for one source only
    pub fn known_hashes(&self, source_id: Option<i64>) -> Result<HashSet<String>, StorageError> {
        let conn = self.conn.lock();
        let hashes = match source_id {
            Some(id) => {
                let mut stmt = conn.prepare("SELECT file_hash FROM images WHERE source_id = ?1")?;
                let rows = stmt.query_map(params![id], |row| row.get(0))?;
                rows.collect::<Result<HashSet<String>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare("SELECT file_hash FROM images")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<HashSet<String>, _>>()?
            }
        };
        Ok(hashes)
    }

    /// Processed images whose text contains `keyword`, newest first.
    /// An empty keyword matches everything.
    pub fn search(
        &self,
        keyword: &str,
        emotion: Option<Emotion>,
    ) -> Result<Vec<ImageRecord>, StorageError> {
        let pattern = format!("%{}%", keyword.trim());
        let emotion = emotion.map(|e| e.as_str());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, file_path, ocr_text, filtered_text, emotion,
                    emotion_positive, emotion_negative, added_time
             FROM images
             WHERE processed = 1
               AND (filtered_text LIKE ?1 OR ocr_text LIKE ?1)
               AND (?2 IS NULL OR emotion = ?2)
             ORDER BY added_time DESC, id DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![pattern, emotion, SEARCH_LIMIT as i64], |row| {
            Ok((image_record(row)?, row.get::<_, Option<String>>(4)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, label) = row?;
            record.emotion = match label {
                Some(label) => {
                    Some(Emotion::parse(&label).ok_or(StorageError::InvalidEmotion(label))?)
                }
                None => None,
            };
            records.push(record);
        }
        Ok(records)
    }

    pub fn statistics(&self) -> Result<Statistics, StorageError> {
        let conn = self.conn.lock();
        let (total, processed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(processed), 0) FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT emotion, COUNT(*) FROM images
             WHERE processed = 1 AND emotion IS NOT NULL
             GROUP BY emotion",
        )?;
        let emotions = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, count(row.get(1)?))))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(Statistics {
            total: count(total),
            processed: count(processed),
            unprocessed: count(total - processed),
            emotions,
        })
    }

    fn write_record(conn: &Connection, record: &AnalysisRecord) -> Result<(), StorageError> {
        let updated = conn.execute(
            "UPDATE images
             SET ocr_text = ?1, filtered_text = ?2, emotion = ?3,
                 emotion_positive = ?4, emotion_negative = ?5, processed = 1
             WHERE id = ?6",
            params![
                record.ocr_text,
                record.filtered_text,
                record.emotion.as_str(),
                record.pos_score,
                record.neg_score,
                record.image_id
            ],
        )?;
        if updated == 0 {
            warn!("No image with id {} to update", record.image_id);
        }
        Ok(())
    }
}

fn image_record(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get(0)?,
        file_path: PathBuf::from(row.get::<_, String>(1)?),
        ocr_text: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        filtered_text: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        emotion: None,
        emotion_positive: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        emotion_negative: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        added_time: row.get(7)?,
    })
}

impl PersistenceGateway for SqliteStore {
    fn record(&self, record: &AnalysisRecord) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        Self::write_record(&conn, record)
    }

    fn record_batch(&self, records: &[AnalysisRecord]) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in records {
            Self::write_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn next_unprocessed(&self, limit: usize) -> Result<Vec<PendingImage>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, file_path FROM images WHERE processed = 0 ORDER BY id LIMIT ?1")?;
        let pending = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PendingImage {
                    id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }
}
