//! Folder scanning and content hashing

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lowercase file extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "gif", "tiff"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// All image files under `folder`, recursively, sorted by path.
/// A missing folder yields an empty list. Symlinked subdirectories are skipped.
pub fn scan_folder(folder: &Path) -> Vec<PathBuf> {
    let mut images = Vec::new();
    if !folder.is_dir() {
        warn!("Folder does not exist: {:?}", folder);
        return images;
    }

    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {:?}: {}", dir, e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            // Never follow symlinked directories, they may form cycles
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_symlink() && path.is_dir() {
                debug!("Skipping symlinked directory {:?}", path);
            } else if is_image_file(&path) {
                images.push(path);
            }
        }
    }

    images.sort();
    debug!("Found {} images in {:?}", images.len(), folder);
    images
}

/// SHA-256 of the file contents, hex encoded
pub fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// An image whose content has not been seen before
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub path: PathBuf,
    pub hash: String,
}

/// Scan `folder` and keep images whose hash is not in `known`.
/// Newly found hashes are added to `known`, so duplicates inside the folder
/// are reported once.
pub fn find_new_images(folder: &Path, known: &mut HashSet<String>) -> Vec<NewImage> {
    let mut found = Vec::new();

    for path in scan_folder(folder) {
        let hash = match content_hash(&path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Failed to hash {:?}: {}", path, e);
                continue;
            }
        };

        if known.insert(hash.clone()) {
            found.push(NewImage { path, hash });
        }
    }

    found
}
