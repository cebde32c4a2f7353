// =============================================================================
// Mediaron Federated Media Repository - Remote Fetcher Module
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
//   Worker pool that downloads media from remote origin servers and persists
//   it locally. Callers receive exactly one outcome on a one-shot channel:
//   either a fully persisted record (blocking mode) or a live byte stream
//   while persistence continues in the background (non-blocking mode).
//   Concurrent requests for the same item are deduplicated internally; the
//   download orchestrator coalesces at its own layer as well, and both are
//   safe together. The wire transport itself is delegated to an injected
//   resource handler.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//
// Features:
//   • Bounded worker pool over an mpsc job queue
//   • In-flight deduplication per (origin, media id, mode)
//   • One-shot outcome delivery per caller
//   • Streaming fan-out of live downloads to every waiter plus persistence
//   • Size ceiling enforcement for remote blobs
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with anyhow/thiserror
//
// Quality Assurance:
//   • Comprehensive unit testing
//   • Integration test coverage
//
// =============================================================================

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use ruma::{OwnedServerName, ServerName};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    content_cache::ContentCache,
    data::Data,
    datastore::Datastores,
    fanout,
    stream::{self, ByteStream},
    MediaRecord,
};
use crate::{utils, Config, Error, Result};

/// A raw federation response for a single media item, produced by the
/// transport layer.
pub struct RemoteResource {
    pub stream: ByteStream,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Outbound transport for fetching media from an origin server.
///
/// Implementations own retries and backoff and map upstream failures onto the
/// crate error taxonomy: a remote 404 becomes [`Error::NotFound`], 5xx and
/// timeouts become [`Error::UpstreamUnavailable`], an aborted transfer
/// becomes [`Error::Cancelled`].
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn fetch_remote_media(
        &self,
        origin: &ServerName,
        media_id: &str,
    ) -> Result<RemoteResource>;
}

/// Successful outcome of a remote fetch job.
///
/// Exactly one of `media_record` (the blob was fully persisted first) or
/// `live_stream` (bytes are still arriving) is populated.
pub struct RemoteFetchResult {
    pub media_record: Option<MediaRecord>,
    pub live_stream: Option<ByteStream>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

type FetchWaiter = oneshot::Sender<Result<RemoteFetchResult>>;

struct FetchJob {
    origin: OwnedServerName,
    media_id: String,
    wait_for_completion: bool,
}

fn fetch_key(origin: &ServerName, media_id: &str, wait_for_completion: bool) -> String {
    format!("{origin}/{media_id}?block={wait_for_completion}")
}

pub struct Service {
    config: Arc<RwLock<Config>>,
    db: Arc<dyn Data>,
    datastores: Arc<Datastores>,
    content_cache: Arc<ContentCache>,
    handler: Arc<dyn ResourceHandler>,
    sender: mpsc::UnboundedSender<FetchJob>,
    receiver: Mutex<mpsc::UnboundedReceiver<FetchJob>>,
    in_flight: StdMutex<HashMap<String, Vec<FetchWaiter>>>,
}

impl Service {
    pub fn build(
        config: Arc<RwLock<Config>>,
        db: Arc<dyn Data>,
        datastores: Arc<Datastores>,
        content_cache: Arc<ContentCache>,
        handler: Arc<dyn ResourceHandler>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            db,
            datastores,
            content_cache,
            handler,
            sender,
            receiver: Mutex::new(receiver),
            in_flight: StdMutex::new(HashMap::new()),
        })
    }

    /// Spawns the download worker pool.
    pub fn start_workers(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let workers = service
                .config
                .read()
                .await
                .media
                .remote_download_workers
                .max(1);
            info!("🔧 Starting {workers} remote media download workers");
            for _ in 0..workers {
                let worker = Arc::clone(&service);
                tokio::spawn(async move { worker.worker_loop().await });
            }
        });
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                match receiver.recv().await {
                    Some(job) => job,
                    None => break,
                }
            };
            self.process(job).await;
        }
    }

    /// Requests `media_id` from `origin`. The returned channel delivers
    /// exactly one outcome; dropping it releases interest in the result.
    ///
    /// With `wait_for_completion`, the outcome arrives after the blob is
    /// persisted and carries the new record. Without it, the outcome carries
    /// a live stream as soon as the origin starts responding, and
    /// persistence finishes in the background.
    pub fn download_remote_media(
        &self,
        origin: &ServerName,
        media_id: &str,
        wait_for_completion: bool,
    ) -> oneshot::Receiver<Result<RemoteFetchResult>> {
        let (sender, receiver) = oneshot::channel();
        let key = fetch_key(origin, media_id, wait_for_completion);

        let enqueue = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    debug!("Joining in-flight remote fetch for {key}");
                    entry.get_mut().push(sender);
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(vec![sender]);
                    true
                }
            }
        };

        if enqueue {
            let job = FetchJob {
                origin: origin.to_owned(),
                media_id: media_id.to_owned(),
                wait_for_completion,
            };
            if self.sender.send(job).is_err() {
                error!("Remote download queue is closed; failing fetch for {key}");
                for waiter in self.take_waiters(&key) {
                    let _ = waiter.send(Err(Error::Internal(
                        "remote download queue is closed".to_owned(),
                    )));
                }
            }
        }

        receiver
    }

    fn take_waiters(&self, key: &str) -> Vec<FetchWaiter> {
        self.in_flight
            .lock()
            .unwrap()
            .remove(key)
            .unwrap_or_default()
    }

    async fn process(self: &Arc<Self>, job: FetchJob) {
        let key = fetch_key(&job.origin, &job.media_id, job.wait_for_completion);
        debug!("🔧 Fetching remote media {key}");
        metrics::counter!("mediaron_remote_media_fetches_total").increment(1);

        if job.wait_for_completion {
            let result = self.fetch_and_persist(&job.origin, &job.media_id).await;
            let waiters = self.take_waiters(&key);
            match result {
                Ok((record, content_type, filename)) => {
                    info!(
                        "✅ Persisted remote media {}/{} as {}",
                        job.origin, job.media_id, record.sha256_hex
                    );
                    for waiter in waiters {
                        let _ = waiter.send(Ok(RemoteFetchResult {
                            media_record: Some(record.clone()),
                            live_stream: None,
                            content_type: content_type.clone(),
                            filename: filename.clone(),
                        }));
                    }
                }
                Err(err) => {
                    warn!(
                        "⚠️ Remote fetch of {}/{} failed: {err}",
                        job.origin, job.media_id
                    );
                    for waiter in waiters {
                        let _ = waiter.send(Err(err.clone()));
                    }
                }
            }
            return;
        }

        match self
            .handler
            .fetch_remote_media(&job.origin, &job.media_id)
            .await
        {
            Err(err) => {
                warn!(
                    "⚠️ Remote fetch of {}/{} failed: {err}",
                    job.origin, job.media_id
                );
                for waiter in self.take_waiters(&key) {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
            Ok(resource) => {
                let waiters: Vec<FetchWaiter> = self
                    .take_waiters(&key)
                    .into_iter()
                    .filter(|waiter| !waiter.is_closed())
                    .collect();

                // One copy per live waiter, plus one the persistence task
                // drains in the background.
                let mut streams = fanout::clone_reader(resource.stream, waiters.len() + 1).into_iter();

                if let Some(persist_copy) = streams.next() {
                    let service = Arc::clone(self);
                    let origin = job.origin.clone();
                    let media_id = job.media_id.clone();
                    let content_type = resource.content_type.clone();
                    let filename = resource.filename.clone();
                    tokio::spawn(async move {
                        match service
                            .persist_stream(&origin, &media_id, persist_copy, content_type, filename)
                            .await
                        {
                            Ok(record) => info!(
                                "✅ Persisted remote media {origin}/{media_id} as {}",
                                record.sha256_hex
                            ),
                            Err(err) => error!(
                                "Failed to persist remote media {origin}/{media_id}: {err}"
                            ),
                        }
                    });
                }

                for (waiter, live_stream) in waiters.into_iter().zip(streams) {
                    let _ = waiter.send(Ok(RemoteFetchResult {
                        media_record: None,
                        live_stream: Some(live_stream),
                        content_type: resource.content_type.clone(),
                        filename: resource.filename.clone(),
                    }));
                }
            }
        }
    }

    async fn fetch_and_persist(
        &self,
        origin: &ServerName,
        media_id: &str,
    ) -> Result<(MediaRecord, Option<String>, Option<String>)> {
        let resource = self.handler.fetch_remote_media(origin, media_id).await?;
        let content_type = resource.content_type;
        let filename = resource.filename;
        let record = self
            .persist_stream(
                origin,
                media_id,
                resource.stream,
                content_type.clone(),
                filename.clone(),
            )
            .await?;
        Ok((record, content_type, filename))
    }

    /// Buffers the download, stores it in the default datastore, creates the
    /// metadata record, and seeds the content cache for small files.
    async fn persist_stream(
        &self,
        origin: &ServerName,
        media_id: &str,
        source: ByteStream,
        content_type: Option<String>,
        filename: Option<String>,
    ) -> Result<MediaRecord> {
        let (max_size, cache_ceiling) = {
            let config = self.config.read().await;
            (
                config.media.max_remote_size_bytes,
                config.media.content_cache_max_file_bytes,
            )
        };

        let contents = Bytes::from(stream::collect(source, Some(max_size)).await?);
        let sha256_hex = hex::encode(Sha256::digest(&contents));
        let size_bytes = contents.len() as u64;

        let datastore = self.datastores.default_store()?;
        let location = datastore.create(&sha256_hex, contents.clone()).await?;

        let record = MediaRecord {
            origin: origin.to_owned(),
            media_id: media_id.to_owned(),
            sha256_hex: sha256_hex.clone(),
            size_bytes,
            content_type,
            upload_name: filename,
            datastore_id: datastore.id().to_owned(),
            location,
            quarantined: false,
            creation_ts: utils::millis_since_unix_epoch(),
        };

        // Persistence is not tied to any caller's lifetime.
        let ctx = CancellationToken::new();
        self.db.create_media_metadata(&record, &ctx).await?;

        if size_bytes <= cache_ceiling {
            self.content_cache.insert(&sha256_hex, contents);
        }

        Ok(record)
    }
}
