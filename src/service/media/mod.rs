// =============================================================================
// Mediaron Federated Media Repository - Media Download Module
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
//   Download orchestration for the media repository: given an origin server
//   name and a media id, produce a byte stream plus metadata. Concurrent
//   requests for the same item are coalesced into one execution whose
//   resulting stream is fanned out to every caller; unknown remote items are
//   fetched from their origin on demand; quarantine and origin-authority
//   policy are enforced before any bytes are emitted.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Request coalescing keyed by the full request fingerprint
//   • Hot metadata cache in front of the metadata store
//   • Content-addressed in-memory blob cache
//   • Remote fetch with blocking and live-streaming modes
//   • Quarantine substitution artifacts
//   • Per-caller cancellation isolation
//
// Architecture:
//   • Async/await native implementation
//   • Zero-copy operations where possible
//   • Lock-free data structures
//   • Enterprise monitoring integration
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with anyhow/thiserror
//   • Serialization with serde
//
// References:
//   • Matrix.org specification: https://matrix.org/
//   • matrix-media-repo reference: https://github.com/turt2live/matrix-media-repo
//   • Matrix spec: https://spec.matrix.org/
//
// Quality Assurance:
//   • Comprehensive unit testing
//   • Integration test coverage
//   • Performance benchmarking
//
// =============================================================================

pub mod coalesce;
pub mod content_cache;
mod data;
pub mod datastore;
pub mod fanout;
pub mod hot_cache;
pub mod quarantine;
pub mod remote;
pub mod stream;

use std::sync::Arc;

use bytes::Bytes;
use ruma::{OwnedServerName, ServerName};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub use coalesce::RequestCoalescer;
pub use content_cache::{CachedMedia, ContentCache};
pub use data::Data;
pub use datastore::{Datastore, Datastores, FilesystemDatastore};
pub use hot_cache::HotCache;
pub use remote::{RemoteFetchResult, RemoteResource, ResourceHandler};
pub use stream::ByteStream;

use crate::{utils, Config, Error, Result};

/// Content type of the quarantine replacement artifact.
pub const QUARANTINE_CONTENT_TYPE: &str = "image/png";
/// Upload name of the quarantine replacement artifact.
pub const QUARANTINE_UPLOAD_NAME: &str = "quarantine.png";

/// A stored media item.
///
/// Identity key is `(origin, media_id)`. Immutable after creation except for
/// the quarantine flag. Two records sharing a sha256 hash describe identical
/// content, though their upload names may differ.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MediaRecord {
    pub origin: OwnedServerName,
    pub media_id: String,
    pub sha256_hex: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub upload_name: Option<String>,
    pub datastore_id: String,
    pub location: String,
    pub quarantined: bool,
    pub creation_ts: u64,
}

impl MediaRecord {
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.origin, self.media_id)
    }
}

/// The per-response view handed to the HTTP layer.
pub struct MinimalMediaView {
    pub origin: OwnedServerName,
    pub media_id: String,
    pub content_type: Option<String>,
    pub upload_name: Option<String>,
    /// `-1` when the total size is not yet known (live remote stream).
    pub size_bytes: i64,
    /// Single-consumer byte source. Always populated on success.
    pub stream: Option<ByteStream>,
    /// The full record, when resolution produced one.
    pub known_record: Option<MediaRecord>,
}

impl std::fmt::Debug for MinimalMediaView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinimalMediaView")
            .field("origin", &self.origin)
            .field("media_id", &self.media_id)
            .field("content_type", &self.content_type)
            .field("upload_name", &self.upload_name)
            .field("size_bytes", &self.size_bytes)
            .field("stream", &self.stream.as_ref().map(|_| "<stream>"))
            .field("known_record", &self.known_record)
            .finish()
    }
}

impl MinimalMediaView {
    fn from_record(record: MediaRecord) -> Self {
        Self {
            origin: record.origin.clone(),
            media_id: record.media_id.clone(),
            content_type: record.content_type.clone(),
            upload_name: record.upload_name.clone(),
            size_bytes: record.size_bytes as i64,
            stream: None,
            known_record: Some(record),
        }
    }

    fn clone_without_stream(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            media_id: self.media_id.clone(),
            content_type: self.content_type.clone(),
            upload_name: self.upload_name.clone(),
            size_bytes: self.size_bytes,
            stream: None,
            known_record: self.known_record.clone(),
        }
    }
}

/// Splits one resolved view into per-waiter views, fanning the byte stream
/// out so each caller consumes an independent copy.
fn split_view_for_waiters(
    view: MinimalMediaView,
    waiter_count: usize,
) -> Result<Vec<MinimalMediaView>> {
    if waiter_count == 0 {
        return Ok(Vec::new());
    }

    let mut view = view;
    match view.stream.take() {
        Some(source) => Ok(fanout::clone_reader(source, waiter_count)
            .into_iter()
            .map(|stream| {
                let mut copy = view.clone_without_stream();
                copy.stream = Some(stream);
                copy
            })
            .collect()),
        None => Ok((0..waiter_count)
            .map(|_| view.clone_without_stream())
            .collect()),
    }
}

/// The download orchestrator.
///
/// Cheap to clone; clones share every underlying cache, store handle, and
/// in-flight table. Injected collaborators are documented in `data`,
/// `datastore`, and `remote`.
pub struct Service {
    config: Arc<RwLock<Config>>,
    pub db: Arc<dyn Data>,
    pub datastores: Arc<Datastores>,
    pub content_cache: Arc<ContentCache>,
    pub hot_cache: Arc<HotCache>,
    pub remote: Arc<remote::Service>,
    requests: RequestCoalescer<MinimalMediaView>,
    records: RequestCoalescer<MediaRecord>,
}

impl Clone for Service {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            db: Arc::clone(&self.db),
            datastores: Arc::clone(&self.datastores),
            content_cache: Arc::clone(&self.content_cache),
            hot_cache: Arc::clone(&self.hot_cache),
            remote: Arc::clone(&self.remote),
            requests: self.requests.clone(),
            records: self.records.clone(),
        }
    }
}

impl Service {
    pub fn build(
        config: Arc<RwLock<Config>>,
        db: Arc<dyn Data>,
        datastores: Arc<Datastores>,
        content_cache: Arc<ContentCache>,
        handler: Arc<dyn ResourceHandler>,
    ) -> Arc<Self> {
        let hot_cache = Arc::new(HotCache::new(Arc::clone(&config)));
        let remote = remote::Service::build(
            Arc::clone(&config),
            Arc::clone(&db),
            Arc::clone(&datastores),
            Arc::clone(&content_cache),
            handler,
        );

        Arc::new(Self {
            config,
            db,
            datastores,
            content_cache,
            hot_cache,
            remote,
            requests: RequestCoalescer::new(),
            records: RequestCoalescer::new(),
        })
    }

    /// Spawns the hot-cache sweeper and the remote download workers.
    pub fn start_background_tasks(&self) {
        self.hot_cache.start_sweeper();
        self.remote.start_workers();
    }

    /// Resolves `(origin, media_id)` to a byte stream plus metadata.
    ///
    /// `download_remote` allows fetching unknown items from their origin
    /// server. `block_for_media` demands a fully-resolved record (exact size
    /// and hash) before returning. Cancelling `ctx` aborts only this caller's
    /// wait; work shared with concurrent callers for the same item keeps
    /// running for their benefit.
    #[instrument(skip(self, ctx))]
    pub async fn get(
        &self,
        origin: &ServerName,
        media_id: &str,
        download_remote: bool,
        block_for_media: bool,
        ctx: &CancellationToken,
    ) -> Result<MinimalMediaView> {
        if media_id.is_empty() {
            return Err(Error::BadRequest("media id must not be empty".to_owned()));
        }

        let key = format!("{origin}/{media_id}?remote={download_remote}&block={block_for_media}");
        let this = self.clone();
        let origin = origin.to_owned();
        let media_id = media_id.to_owned();

        self.requests
            .run(
                &key,
                async move {
                    this.get_body(origin, media_id, download_remote, block_for_media)
                        .await
                },
                split_view_for_waiters,
                ctx,
            )
            .await
    }

    /// The shared body of a coalesced `get`.
    async fn get_body(
        self,
        origin: OwnedServerName,
        media_id: String,
        download_remote: bool,
        block_for_media: bool,
    ) -> Result<MinimalMediaView> {
        // The body outlives any individual caller; its I/O runs under a token
        // no single waiter can cancel.
        let ctx = CancellationToken::new();

        let mut view = if block_for_media {
            let record = self
                .resolve_record(&origin, &media_id, download_remote, &ctx)
                .await?;
            MinimalMediaView::from_record(record)
        } else {
            self.resolve_minimal(&origin, &media_id, download_remote, &ctx)
                .await?
        };

        if let Some(record) = view.known_record.clone() {
            // Quarantine is checked before any byte source, the content
            // cache included, so quarantined bytes can never leak through a
            // warm cache entry.
            if record.quarantined {
                return self.quarantine_response(&origin, &media_id, record).await;
            }

            // Access bookkeeping must not fail the download.
            if let Err(err) = self
                .db
                .upsert_last_access(&record.sha256_hex, utils::millis_since_unix_epoch(), &ctx)
                .await
            {
                error!(
                    "Failed to record last access for {}: {err}",
                    record.sha256_hex
                );
            }

            self.hot_cache.insert(record.clone()).await;
            self.content_cache.increment_downloads(&record.sha256_hex);

            if let Some(cached) = self.content_cache.get_media(&record)? {
                if !cached.contents.is_empty() {
                    debug!("✅ Content cache hit for {}", record.sha256_hex);
                    metrics::counter!("mediaron_content_cache_hits_total").increment(1);
                    view.stream = Some(stream::from_bytes(cached.contents));
                    return Ok(view);
                }
            }
        }

        // A live stream handed over by the remote fetch path.
        if view.stream.is_some() {
            return Ok(view);
        }

        let Some(record) = view.known_record.clone() else {
            return Err(Error::Internal(format!(
                "resolved {origin}/{media_id} with neither a stream nor a record"
            )));
        };
        let datastore = self.datastores.get(&record.datastore_id)?;
        view.stream = Some(datastore.open(&record.location, &ctx).await?);
        Ok(view)
    }

    /// Full-record resolution (`block_for_media` path), coalesced separately
    /// so metadata-only lookups for the same item share one execution.
    /// Records are immutable and therefore safely shared between waiters.
    async fn resolve_record(
        &self,
        origin: &ServerName,
        media_id: &str,
        download_remote: bool,
        ctx: &CancellationToken,
    ) -> Result<MediaRecord> {
        let key = format!("record:{origin}/{media_id}?remote={download_remote}");
        let this = self.clone();
        let origin = origin.to_owned();
        let media_id = media_id.to_owned();

        self.records
            .run_shared(
                &key,
                async move { this.record_body(origin, media_id, download_remote).await },
                ctx,
            )
            .await
    }

    async fn record_body(
        self,
        origin: OwnedServerName,
        media_id: String,
        download_remote: bool,
    ) -> Result<MediaRecord> {
        let ctx = CancellationToken::new();

        if let Some(record) = self.lookup_known(&origin, &media_id, &ctx).await? {
            return Ok(record);
        }

        self.guard_remote_fetch(&origin, &media_id, download_remote)
            .await?;

        let receiver = self.remote.download_remote_media(&origin, &media_id, true);
        let outcome = receiver.await.map_err(|_| {
            Error::Internal("remote fetch dropped its result channel".to_owned())
        })?;
        let result = outcome?;

        result.media_record.ok_or_else(|| {
            Error::Internal(format!(
                "remote fetch of {origin}/{media_id} completed without a record"
            ))
        })
    }

    /// Minimal resolution (`block_for_media = false` path). A live remote
    /// stream is used directly, even when no finalized record exists yet.
    async fn resolve_minimal(
        &self,
        origin: &OwnedServerName,
        media_id: &str,
        download_remote: bool,
        ctx: &CancellationToken,
    ) -> Result<MinimalMediaView> {
        if let Some(record) = self.lookup_known(origin, media_id, ctx).await? {
            return Ok(MinimalMediaView::from_record(record));
        }

        self.guard_remote_fetch(origin, media_id, download_remote)
            .await?;

        let receiver = self.remote.download_remote_media(origin, media_id, false);
        let outcome = receiver.await.map_err(|_| {
            Error::Internal("remote fetch dropped its result channel".to_owned())
        })?;
        let result = outcome?;

        if let Some(record) = result.media_record {
            return Ok(MinimalMediaView::from_record(record));
        }

        let Some(live_stream) = result.live_stream else {
            return Err(Error::Internal(format!(
                "remote fetch of {origin}/{media_id} produced neither a stream nor a record"
            )));
        };

        Ok(MinimalMediaView {
            origin: origin.clone(),
            media_id: media_id.to_owned(),
            content_type: result.content_type,
            upload_name: result.filename,
            size_bytes: -1,
            stream: Some(live_stream),
            known_record: None,
        })
    }

    /// Hot cache, then the metadata store. The hot cache is an accelerator
    /// only; a miss proves nothing.
    async fn lookup_known(
        &self,
        origin: &ServerName,
        media_id: &str,
        ctx: &CancellationToken,
    ) -> Result<Option<MediaRecord>> {
        if let Some(record) = self.hot_cache.get(origin, media_id).await {
            debug!("Hot metadata cache hit for {origin}/{media_id}");
            return Ok(Some(record));
        }
        self.db.search_media_metadata(origin, media_id, ctx).await
    }

    /// Origin-authority and download policy for items with no local record.
    async fn guard_remote_fetch(
        &self,
        origin: &ServerName,
        media_id: &str,
        download_remote: bool,
    ) -> Result<()> {
        if self.config.read().await.is_ours(origin) {
            return Err(Error::NotFound(format!(
                "{origin}/{media_id} is not known to this server"
            )));
        }
        if !download_remote {
            return Err(Error::NotFound(format!(
                "{origin}/{media_id} is not cached locally"
            )));
        }
        Ok(())
    }

    async fn quarantine_response(
        &self,
        origin: &ServerName,
        media_id: &str,
        record: MediaRecord,
    ) -> Result<MinimalMediaView> {
        let (replace, width, height) = {
            let config = self.config.read().await;
            (
                config.quarantine.replace_downloads,
                config.quarantine.thumbnail_width,
                config.quarantine.thumbnail_height,
            )
        };

        if !replace {
            return Err(Error::Quarantined(format!(
                "{origin}/{media_id} is quarantined"
            )));
        }

        let artifact = quarantine::generate(width, height)?;
        let png = quarantine::encode_png(artifact)?;
        info!("⚠️ Serving quarantine replacement for {origin}/{media_id}");

        Ok(MinimalMediaView {
            origin: origin.to_owned(),
            media_id: media_id.to_owned(),
            content_type: Some(QUARANTINE_CONTENT_TYPE.to_owned()),
            upload_name: Some(QUARANTINE_UPLOAD_NAME.to_owned()),
            size_bytes: png.len() as i64,
            stream: Some(stream::from_bytes(Bytes::from(png))),
            known_record: Some(record),
        })
    }
}
