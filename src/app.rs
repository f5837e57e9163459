//! Batch Coordinator
//!
//! Drains unprocessed images from the store page by page, analyzes them one
//! at a time and reports progress over a channel.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::analysis::Emotion;
use crate::processor::{ImageAnalysis, MemeProcessor};
use crate::storage::{AnalysisRecord, PendingImage, PersistenceGateway};
use crate::vision::DeviceState;

/// Progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { device: DeviceState },
    ImageDone {
        id: i64,
        path: PathBuf,
        emotion: Emotion,
        has_text: bool,
    },
    ImageFailed { id: i64, path: PathBuf, reason: String },
    Finished(BatchReport),
}

/// Outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Images analyzed, with or without text
    pub processed: usize,
    /// Images that could not be read
    pub failed: usize,
    /// Analyzed images where no text was found
    pub without_text: usize,
    /// Stopped before the queue was empty
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

/// Main batch coordinator
pub struct BatchRunner {
    processor: Arc<MemeProcessor>,
    store: Arc<dyn PersistenceGateway>,
    batch_size: usize,
    max_images: Option<usize>,
    running: Arc<AtomicBool>,
    events_tx: Sender<BatchEvent>,
    events_rx: Receiver<BatchEvent>,
}

impl BatchRunner {
    pub fn new(processor: Arc<MemeProcessor>, store: Arc<dyn PersistenceGateway>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            processor,
            store,
            batch_size: 100,
            max_images: None,
            running: Arc::new(AtomicBool::new(true)),
            events_tx,
            events_rx,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stop after this many images
    pub fn with_max_images(mut self, max_images: Option<usize>) -> Self {
        self.max_images = max_images;
        self
    }

    /// Flag checked between images; store `false` to stop the run
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver for progress events
    pub fn events(&self) -> Receiver<BatchEvent> {
        self.events_rx.clone()
    }

    fn emit(&self, event: BatchEvent) {
        // The runner holds a receiver, so the channel never disconnects
        let _ = self.events_tx.send(event);
    }

    fn remaining(&self, report: &BatchReport) -> Option<usize> {
        self.max_images.map(|max| max.saturating_sub(report.total()))
    }

    /// Process until the queue is empty, `max_images` is reached or the
    /// stop flag is cleared
    pub fn run(&self) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        self.emit(BatchEvent::Started {
            device: self.processor.device(),
        });
        info!("Batch started on {}", self.processor.device());

        'pages: loop {
            let limit = match self.remaining(&report) {
                Some(0) => break,
                Some(remaining) => remaining.min(self.batch_size),
                None => self.batch_size,
            };

            if !self.is_running() {
                report.cancelled = true;
                break;
            }

            let page = self
                .store
                .next_unprocessed(limit)
                .context("Failed to fetch unprocessed images")?;
            if page.is_empty() {
                break;
            }

            let mut records = Vec::with_capacity(page.len());
            for pending in page {
                if !self.is_running() {
                    report.cancelled = true;
                    self.flush(&records)?;
                    break 'pages;
                }
                records.push(self.process_one(pending, &mut report));
            }
            self.flush(&records)?;
        }

        report.elapsed = started.elapsed();
        if report.cancelled {
            info!("Batch cancelled after {} images", report.total());
        } else {
            info!(
                "Batch finished: {} processed, {} failed, {} without text in {:?}",
                report.processed, report.failed, report.without_text, report.elapsed
            );
        }
        self.emit(BatchEvent::Finished(report.clone()));
        Ok(report)
    }

    fn process_one(&self, pending: PendingImage, report: &mut BatchReport) -> AnalysisRecord {
        let PendingImage { id, path } = pending;

        if !path.exists() {
            warn!("Image missing on disk: {:?}", path);
            report.failed += 1;
            self.emit(BatchEvent::ImageFailed {
                id,
                path,
                reason: "file not found".to_string(),
            });
            return AnalysisRecord::from_analysis(id, ImageAnalysis::empty());
        }

        let analysis = self.processor.process_image(&path);
        report.processed += 1;
        if !analysis.has_text() {
            report.without_text += 1;
        }

        self.emit(BatchEvent::ImageDone {
            id,
            path,
            emotion: analysis.emotion,
            has_text: analysis.has_text(),
        });
        AnalysisRecord::from_analysis(id, analysis)
    }

    fn flush(&self, records: &[AnalysisRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.store
            .record_batch(records)
            .with_context(|| format!("Failed to store {} analyses", records.len()))
    }

    /// Run on a background thread
    pub fn spawn(self) -> Result<JoinHandle<Result<BatchReport>>> {
        let handle = std::thread::Builder::new()
            .name("meme-batch".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::tests::{processor_with, write_image};
    use crate::storage::SqliteStore;
    use serde_json::json;
    use std::path::Path;

    fn processor() -> Arc<MemeProcessor> {
        Arc::new(processor_with(json!({
            "rec_texts": ["好开心"],
            "rec_polys": [[[2, 2], [12, 2], [12, 8], [2, 8]]],
            "rec_scores": [0.95]
        })))
    }

    fn store_with(paths: &[PathBuf]) -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        for (i, path) in paths.iter().enumerate() {
            store.add_image(path, &format!("hash{i}"), None).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_run_processes_all_pages() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_image(dir.path(), "a.png"),
            dir.path().join("gone.png"),
            write_image(dir.path(), "c.png"),
        ];
        let store = store_with(&paths);
        let runner = BatchRunner::new(processor(), store.clone()).with_batch_size(2);
        let events = runner.events();

        let report = runner.run().unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.without_text, 0);
        assert!(!report.cancelled);
        assert!(store.next_unprocessed(10).unwrap().is_empty());

        let hits = store.search("开心", Some(Emotion::Positive)).unwrap();
        assert_eq!(hits.len(), 2);

        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(events[0], BatchEvent::Started { device: DeviceState::Cpu }));
        assert!(events
            .iter()
            .any(|e| matches!(e, BatchEvent::ImageFailed { path, .. } if path == &paths[1])));
        assert!(matches!(events.last(), Some(BatchEvent::Finished(r)) if r.total() == 3));
    }

    #[test]
    fn test_run_respects_max_images() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_image(dir.path(), "a.png"),
            write_image(dir.path(), "b.png"),
            write_image(dir.path(), "c.png"),
        ];
        let store = store_with(&paths);
        let runner = BatchRunner::new(processor(), store.clone())
            .with_batch_size(10)
            .with_max_images(Some(2));

        let report = runner.run().unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(store.next_unprocessed(10).unwrap().len(), 1);
    }

    #[test]
    fn test_stopped_runner_does_nothing() {
        let store = store_with(&[PathBuf::from("/m/a.png")]);
        let runner = BatchRunner::new(processor(), store.clone());
        runner.stop_handle().store(false, Ordering::SeqCst);

        let report = runner.run().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.total(), 0);
        assert_eq!(store.next_unprocessed(10).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_queue() {
        let store = store_with(&[]);
        let report = BatchRunner::new(processor(), store).run().unwrap();
        assert_eq!(report, BatchReport { elapsed: report.elapsed, ..Default::default() });
    }

    #[test]
    fn test_spawn_runs_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[write_image(dir.path(), "a.png")]);
        let handle = BatchRunner::new(processor(), store).spawn().unwrap();

        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.processed, 1);
        assert!(Path::new(dir.path()).join("a.png").exists());
    }
}
