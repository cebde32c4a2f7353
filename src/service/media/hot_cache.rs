// =============================================================================
// Mediaron Federated Media Repository - Hot Metadata Cache Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Short-TTL cache of resolved media records, keyed by `origin/media_id`,
//   eliding repeated metadata store hits for hot items. Purely an
//   accelerator: absence never implies the record does not exist, and no
//   negative results are cached.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
    time::Instant,
};

use ruma::ServerName;
use tokio::sync::RwLock;
use tracing::debug;

use super::MediaRecord;
use crate::Config;

/// Process-wide hot metadata cache. Safe to share across tasks; every method
/// locks internally and the lock is never held across an await point.
pub struct HotCache {
    config: Arc<RwLock<Config>>,
    entries: StdMutex<HashMap<String, (MediaRecord, Instant)>>,
}

impl HotCache {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            config,
            entries: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, origin: &ServerName, media_id: &str) -> Option<MediaRecord> {
        let ttl = self.config.read().await.hot_cache.ttl();
        let key = format!("{origin}/{media_id}");

        let mut entries = self.entries.lock().unwrap();
        if let Some((record, inserted)) = entries.get(&key) {
            if inserted.elapsed() < ttl {
                return Some(record.clone());
            }
            entries.remove(&key);
        }
        None
    }

    /// Best-effort publish; the record is served verbatim until it expires.
    pub async fn insert(&self, record: MediaRecord) {
        let ttl = self.config.read().await.hot_cache.ttl();
        if ttl.is_zero() {
            return;
        }

        let key = record.cache_key();
        self.entries
            .lock()
            .unwrap()
            .insert(key, (record, Instant::now()));
    }

    /// Drops every expired entry.
    pub async fn sweep(&self) {
        let ttl = self.config.read().await.hot_cache.ttl();

        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        let swept = before - entries.len();
        if swept > 0 {
            debug!("🔧 Swept {swept} expired hot metadata entries");
        }
    }

    pub fn start_sweeper(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = cache.config.read().await.hot_cache.sweep_interval();
                tokio::time::sleep(interval).await;
                cache.sweep().await;
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::server_name;
    use serde_json::json;

    fn test_config(ttl_secs: u64) -> Arc<RwLock<Config>> {
        let config: Config = serde_json::from_value(json!({
            "server_name": "us.example",
            "hot_cache": { "ttl_secs": ttl_secs },
        }))
        .expect("config deserializes");
        Arc::new(RwLock::new(config))
    }

    fn test_record() -> MediaRecord {
        MediaRecord {
            origin: server_name!("ex.org").to_owned(),
            media_id: "abc".to_owned(),
            sha256_hex: "aa".repeat(32),
            size_bytes: 42,
            content_type: Some("image/png".to_owned()),
            upload_name: Some("cat.png".to_owned()),
            datastore_id: "default".to_owned(),
            location: "aa/aa/hash".to_owned(),
            quarantined: false,
            creation_ts: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let cache = HotCache::new(test_config(30));
        cache.insert(test_record()).await;

        let hit = cache.get(server_name!("ex.org"), "abc").await;
        assert_eq!(hit.unwrap().media_id, "abc");

        let miss = cache.get(server_name!("ex.org"), "other").await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_caching() {
        let cache = HotCache::new(test_config(0));
        cache.insert(test_record()).await;
        assert!(cache.get(server_name!("ex.org"), "abc").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_entries() {
        let cache = HotCache::new(test_config(30));
        cache.insert(test_record()).await;
        assert_eq!(cache.len(), 1);

        // Shrink the TTL to zero so the existing entry is already expired.
        cache.config.write().await.hot_cache.ttl_secs = 0;
        cache.sweep().await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_newer_insert_replaces_older() {
        let cache = HotCache::new(test_config(30));
        cache.insert(test_record()).await;

        let mut updated = test_record();
        updated.quarantined = true;
        cache.insert(updated).await;

        let hit = cache.get(server_name!("ex.org"), "abc").await.unwrap();
        assert!(hit.quarantined);
        assert_eq!(cache.len(), 1);
    }
}
