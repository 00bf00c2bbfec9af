/*
 *  artwork.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Album-art fetch with a per-process byte cache. URLs are assumed
 *  content-immutable, so entries are never invalidated, only LRU-evicted.
 */

use image::RgbImage;
use log::debug;
use reqwest::Client;
use thiserror::Error;

use crate::lru::LruMap;
use crate::transport::{self, TransportError};

const BYTE_CACHE_ENTRIES: usize = 32;

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("artwork fetch failed: {0}")]
    Fetch(#[from] TransportError),
    #[error("artwork body read failed: {0}")]
    Body(#[from] reqwest::Error),
    #[error("artwork decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Fetches and decodes album art, caching response bytes keyed by URL.
pub struct ArtworkFetcher {
    client: Client,
    bytes: LruMap<String, Vec<u8>>,
}

impl ArtworkFetcher {
    pub fn new(client: Client) -> Self {
        ArtworkFetcher {
            client,
            bytes: LruMap::new(BYTE_CACHE_ENTRIES),
        }
    }

    async fn fetch_bytes(&mut self, url: &str) -> Result<Vec<u8>, ArtworkError> {
        if let Some(cached) = self.bytes.get(&url.to_string()) {
            return Ok(cached.clone());
        }

        let response = transport::send_with_retry(self.client.get(url)).await?;
        let body = response.bytes().await?.to_vec();
        debug!("fetched {} bytes of artwork from {url}", body.len());
        self.bytes.insert(url.to_string(), body.clone());
        Ok(body)
    }

    /// Loads the album art at `url` as an RGB bitmap.
    pub async fn image(&mut self, url: &str) -> Result<RgbImage, ArtworkError> {
        let body = self.fetch_bytes(url).await?;
        let decoded = image::load_from_memory(&body)?;
        Ok(decoded.to_rgb8())
    }

    #[cfg(test)]
    pub fn cached_urls(&self) -> usize {
        self.bytes.len()
    }
}
