/*
 *  themecache.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Memoizes theme-colour extraction by perceptual image hash. Clustering
 *  the artwork is by far the most expensive step of a render, and the same
 *  art re-arrives constantly (track repeats, CURRENT after UPCOMING), so
 *  hits are the common case. An optional on-disk store keeps colours
 *  across restarts.
 */

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::colour;
use crate::lru::LruMap;

const HASH_THUMB_DIM: u32 = 64;
const MEM_ENTRIES: usize = 64;

/// Content hash of a nearest-neighbour 64x64 thumbnail: stable under
/// negligible pixel variation, cheap to compute.
pub fn perceptual_hash(image: &RgbImage) -> String {
    let thumb = imageops::resize(image, HASH_THUMB_DIM, HASH_THUMB_DIM, FilterType::Nearest);
    let digest = Sha256::digest(thumb.as_raw());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
struct StoredColour {
    r: u8,
    g: u8,
    b: u8,
}

/// Byte-size-bounded directory of colour records, one JSON file per hash,
/// evicted least-recently-used (file mtime; reads rewrite the file to
/// refresh it). Every failure here is logged and swallowed - the store is
/// an accelerator, never a correctness dependency.
#[derive(Debug)]
pub struct DiskThemeStore {
    dir: PathBuf,
    size_limit: u64,
}

impl DiskThemeStore {
    pub fn new(dir: impl Into<PathBuf>, size_limit: u64) -> Self {
        DiskThemeStore {
            dir: dir.into(),
            size_limit,
        }
    }

    fn entry_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    pub fn get(&self, hash: &str) -> Option<(u8, u8, u8)> {
        let path = self.entry_path(hash);
        let data = fs::read(&path).ok()?;
        let stored: StoredColour = serde_json::from_slice(&data).ok()?;
        // Rewrite to bump mtime, marking the entry recently used.
        if let Err(e) = fs::write(&path, &data) {
            debug!("theme store touch failed for {}: {}", path.display(), e);
        }
        Some((stored.r, stored.g, stored.b))
    }

    pub fn put(&self, hash: &str, colour: (u8, u8, u8)) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("cannot create theme store {}: {}", self.dir.display(), e);
            return;
        }
        let record = StoredColour {
            r: colour.0,
            g: colour.1,
            b: colour.2,
        };
        let path = self.entry_path(hash);
        match serde_json::to_vec(&record) {
            Ok(data) => {
                if let Err(e) = fs::write(&path, data) {
                    warn!("theme store write failed for {}: {}", path.display(), e);
                    return;
                }
            }
            Err(e) => {
                warn!("theme store encode failed: {}", e);
                return;
            }
        }
        self.evict_to_limit();
    }

    fn evict_to_limit(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!("theme store scan failed: {}", e);
                return;
            }
        };

        let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let mtime = meta.modified().ok()?;
                Some((e.path(), meta.len(), mtime))
            })
            .collect();

        let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
        if total <= self.size_limit {
            return;
        }

        // Oldest mtime first.
        files.sort_by_key(|(_, _, mtime)| *mtime);
        for (path, len, _) in files {
            if total <= self.size_limit {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("theme store evicted {}", path.display());
                    total = total.saturating_sub(len);
                }
                Err(e) => warn!("theme store eviction failed for {}: {}", path.display(), e),
            }
        }
    }
}

/// In-memory LRU of extracted theme colours, optionally backed by a
/// [`DiskThemeStore`]. Owned by the image pipeline worker; no internal
/// locking needed.
#[derive(Debug)]
pub struct ThemeColourCache {
    memory: LruMap<String, (u8, u8, u8)>,
    disk: Option<DiskThemeStore>,
}

impl ThemeColourCache {
    pub fn new(disk: Option<DiskThemeStore>) -> Self {
        ThemeColourCache {
            memory: LruMap::new(MEM_ENTRIES),
            disk,
        }
    }

    /// Returns the theme colour for `image`, computing and storing it on a
    /// miss.
    pub fn get(&mut self, image: &RgbImage) -> (u8, u8, u8) {
        let hash = perceptual_hash(image);

        if let Some(colour) = self.memory.get(&hash) {
            return *colour;
        }
        if let Some(disk) = &self.disk {
            if let Some(colour) = disk.get(&hash) {
                self.memory.insert(hash, colour);
                return colour;
            }
        }

        let colour = colour::theme_colour(image);
        debug!("theme colour computed for {}: {:?}", &hash[..12], colour);
        self.memory.insert(hash.clone(), colour);
        if let Some(disk) = &self.disk {
            disk.put(&hash, colour);
        }
        colour
    }
}
