// =============================================================================
// Mediaron Federated Media Repository - Media Data Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Persistent metadata store interface for the media download core. The
//   postgres implementation lives in `crate::database`; tests substitute
//   in-memory doubles.
//
// =============================================================================

use async_trait::async_trait;
use ruma::ServerName;
use tokio_util::sync::CancellationToken;

use super::MediaRecord;
use crate::Result;

/// Persistent lookup of media records by `(origin, media_id)`.
///
/// Implementations must be safe to share across tasks and must honor `ctx`
/// cancellation on their own I/O.
#[async_trait]
pub trait Data: Send + Sync {
    /// Looks up the record for `origin`/`media_id`. `Ok(None)` means no row
    /// exists; every other failure surfaces as an error.
    async fn search_media_metadata(
        &self,
        origin: &ServerName,
        media_id: &str,
        ctx: &CancellationToken,
    ) -> Result<Option<MediaRecord>>;

    /// Persists a freshly created record. Records are immutable after
    /// creation except for the quarantine flag, so replays are no-ops.
    async fn create_media_metadata(
        &self,
        record: &MediaRecord,
        ctx: &CancellationToken,
    ) -> Result<()>;

    /// Monotonically bumps the last-access timestamp for the content
    /// addressed by `sha256_hex`.
    async fn upsert_last_access(
        &self,
        sha256_hex: &str,
        now_millis: u64,
        ctx: &CancellationToken,
    ) -> Result<()>;
}
