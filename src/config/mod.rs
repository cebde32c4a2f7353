// =============================================================================
// Mediaron Federated Media Repository - Configuration Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Mediaron Development Team
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Configuration management and validation for the media download core.
//   The surrounding server deserializes this structure from its config file
//   and hands the core a shared snapshot; every knob is re-read on the next
//   call, so updated values apply without a restart.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Origin authority lookup (which server names are hosted locally)
//   • Quarantine substitution policy
//   • Hot metadata cache tuning
//   • Remote download worker pool sizing
//   • Type-safe defaults for every field
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with anyhow/thiserror
//   • Serialization with serde
//
// Quality Assurance:
//   • Comprehensive unit testing
//   • Integration test coverage
//   • Performance benchmarking
//
// =============================================================================

use std::time::Duration;

use ruma::{OwnedServerName, ServerName};
use serde::Deserialize;

/// Top-level configuration for the media repository core.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The primary homeserver name this deployment is authoritative for.
    pub server_name: OwnedServerName,

    /// Additional locally-hosted server names (per-domain overrides).
    #[serde(default)]
    pub additional_server_names: Vec<OwnedServerName>,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub quarantine: QuarantineConfig,

    #[serde(default)]
    pub hot_cache: HotCacheConfig,
}

impl Config {
    /// Whether `origin` names a server this deployment hosts locally.
    ///
    /// Local origins are authoritative: a missing record means the media does
    /// not exist and must never be fetched from the network.
    pub fn is_ours(&self, origin: &ServerName) -> bool {
        let origin = origin.as_str();
        origin == self.server_name.as_str()
            || self
                .additional_server_names
                .iter()
                .any(|name| name.as_str() == origin)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MediaConfig {
    /// Datastore new blobs (remote downloads) are written to.
    #[serde(default = "default_datastore_id")]
    pub default_datastore_id: String,

    /// Number of workers draining the remote download queue.
    #[serde(default = "default_remote_download_workers")]
    pub remote_download_workers: usize,

    /// Largest remote media item we are willing to persist.
    #[serde(default = "default_max_remote_size_bytes")]
    pub max_remote_size_bytes: u64,

    /// Entry capacity of the in-memory content cache.
    #[serde(default = "default_content_cache_capacity")]
    pub content_cache_capacity: usize,

    /// Files larger than this are never buffered into the content cache.
    #[serde(default = "default_content_cache_max_file_bytes")]
    pub content_cache_max_file_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_datastore_id: default_datastore_id(),
            remote_download_workers: default_remote_download_workers(),
            max_remote_size_bytes: default_max_remote_size_bytes(),
            content_cache_capacity: default_content_cache_capacity(),
            content_cache_max_file_bytes: default_content_cache_max_file_bytes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct QuarantineConfig {
    /// When set, quarantined media is substituted with a generated artifact
    /// instead of being refused outright.
    #[serde(default)]
    pub replace_downloads: bool,

    #[serde(default = "default_quarantine_thumbnail_width")]
    pub thumbnail_width: u32,

    #[serde(default = "default_quarantine_thumbnail_height")]
    pub thumbnail_height: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            replace_downloads: false,
            thumbnail_width: default_quarantine_thumbnail_width(),
            thumbnail_height: default_quarantine_thumbnail_height(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct HotCacheConfig {
    /// How long a resolved record stays valid in the hot metadata cache.
    #[serde(default = "default_hot_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// How often expired hot-cache entries are swept out.
    #[serde(default = "default_hot_cache_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl HotCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_hot_cache_ttl_secs(),
            sweep_interval_secs: default_hot_cache_sweep_interval_secs(),
        }
    }
}

fn default_datastore_id() -> String {
    "default".to_owned()
}

fn default_remote_download_workers() -> usize {
    8
}

fn default_max_remote_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_content_cache_capacity() -> usize {
    1024
}

fn default_content_cache_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_quarantine_thumbnail_width() -> u32 {
    320
}

fn default_quarantine_thumbnail_height() -> u32 {
    240
}

fn default_hot_cache_ttl_secs() -> u64 {
    30
}

fn default_hot_cache_sweep_interval_secs() -> u64 {
    60
}
