//! MemeFinder - batch meme text extraction and sentiment tagging
//!
//! Images are padded, run through an interchangeable OCR engine on the best
//! available device, mapped back to original coordinates, filtered and
//! tagged with a sentiment so they can be searched by keyword later.

pub mod analysis;
pub mod app;
pub mod config;
pub mod processor;
pub mod storage;
pub mod vision;
