// =============================================================================
// Mediaron Federated Media Repository - Content Cache Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   In-memory, content-addressed cache of fully-buffered media blobs, plus
//   per-hash download counters. Distinct records sharing a sha256 hash share
//   one entry. Entries may be evicted at any point between a probe and its
//   use; callers must treat that as a miss.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::Mutex as StdMutex,
};

use bytes::Bytes;
use lru_cache::LruCache;

use super::MediaRecord;
use crate::Result;

/// Fully-buffered contents for a hot media item.
#[derive(Clone, Debug)]
pub struct CachedMedia {
    pub contents: Bytes,
}

/// Process-wide content cache. Safe to share across tasks; every method locks
/// internally.
pub struct ContentCache {
    entries: StdMutex<LruCache<String, CachedMedia>>,
    downloads: StdMutex<HashMap<String, u64>>,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: StdMutex::new(LruCache::new(capacity.max(1))),
            downloads: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns the buffered contents for `record` when hot.
    pub fn get_media(&self, record: &MediaRecord) -> Result<Option<CachedMedia>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get_mut(&record.sha256_hex)
            .cloned())
    }

    pub fn insert(&self, sha256_hex: &str, contents: Bytes) {
        self.entries
            .lock()
            .unwrap()
            .insert(sha256_hex.to_owned(), CachedMedia { contents });
    }

    /// Bumps the download counter for `sha256_hex`, returning the new count.
    pub fn increment_downloads(&self, sha256_hex: &str) -> u64 {
        metrics::counter!("mediaron_media_downloads_total").increment(1);

        let mut downloads = self.downloads.lock().unwrap();
        let counter = downloads.entry(sha256_hex.to_owned()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn download_count(&self, sha256_hex: &str) -> u64 {
        self.downloads
            .lock()
            .unwrap()
            .get(sha256_hex)
            .copied()
            .unwrap_or(0)
    }
}
