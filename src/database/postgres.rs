// =============================================================================
// Mediaron Federated Media Repository - PostgreSQL Metadata Store Module
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
//   PostgreSQL implementation of the media metadata store: record lookup by
//   (origin, media id) and monotonic last-access tracking per content hash.
//   Every query honors the caller's cancellation token.
//
// Dependencies:
//   • Tokio async runtime
//   • sqlx with the PostgreSQL driver
//   • Structured logging with tracing
//
// =============================================================================

use async_trait::async_trait;
use ruma::{OwnedServerName, ServerName};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    service::media::{Data, MediaRecord},
    Error, Result,
};

/// Schema bootstrap for the media metadata tables.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS media_repository (
    origin TEXT NOT NULL,
    media_id TEXT NOT NULL,
    sha256_hex TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    content_type TEXT,
    upload_name TEXT,
    datastore_id TEXT NOT NULL,
    location TEXT NOT NULL,
    quarantined BOOLEAN NOT NULL DEFAULT FALSE,
    creation_ts BIGINT NOT NULL,
    PRIMARY KEY (origin, media_id)
);
CREATE INDEX IF NOT EXISTS media_repository_sha256 ON media_repository (sha256_hex);
CREATE TABLE IF NOT EXISTS media_last_access (
    sha256_hex TEXT PRIMARY KEY,
    accessed_ts BIGINT NOT NULL
)";

const SELECT_RECORD: &str = "SELECT origin, media_id, sha256_hex, size_bytes, content_type, \
     upload_name, datastore_id, location, quarantined, creation_ts \
     FROM media_repository WHERE origin = $1 AND media_id = $2";

const INSERT_RECORD: &str = "INSERT INTO media_repository (origin, media_id, sha256_hex, \
     size_bytes, content_type, upload_name, datastore_id, location, quarantined, creation_ts) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
     ON CONFLICT (origin, media_id) DO NOTHING";

const UPSERT_LAST_ACCESS: &str = "INSERT INTO media_last_access (sha256_hex, accessed_ts) \
     VALUES ($1, $2) \
     ON CONFLICT (sha256_hex) DO UPDATE SET accessed_ts = \
     GREATEST(media_last_access.accessed_ts, EXCLUDED.accessed_ts)";

pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    /// Connects to `database_url` and bootstraps the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("🔧 Connecting to the media metadata database");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_error)?;

        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(db_error)?;
        }

        info!("✅ Media metadata database ready");
        Ok(Self { pool })
    }

    /// Wraps an already-connected pool (the surrounding server owns one).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(err: sqlx::Error) -> Error {
    Error::StorageUnavailable(err.to_string())
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<MediaRecord> {
    let origin: String = row.try_get("origin").map_err(db_error)?;
    let origin = OwnedServerName::try_from(origin)
        .map_err(|err| Error::Internal(format!("invalid origin in media_repository: {err}")))?;
    let size_bytes: i64 = row.try_get("size_bytes").map_err(db_error)?;
    let creation_ts: i64 = row.try_get("creation_ts").map_err(db_error)?;

    Ok(MediaRecord {
        origin,
        media_id: row.try_get("media_id").map_err(db_error)?,
        sha256_hex: row.try_get("sha256_hex").map_err(db_error)?,
        size_bytes: size_bytes.max(0) as u64,
        content_type: row.try_get("content_type").map_err(db_error)?,
        upload_name: row.try_get("upload_name").map_err(db_error)?,
        datastore_id: row.try_get("datastore_id").map_err(db_error)?,
        location: row.try_get("location").map_err(db_error)?,
        quarantined: row.try_get("quarantined").map_err(db_error)?,
        creation_ts: creation_ts.max(0) as u64,
    })
}

#[async_trait]
impl Data for PostgresMetadataStore {
    async fn search_media_metadata(
        &self,
        origin: &ServerName,
        media_id: &str,
        ctx: &CancellationToken,
    ) -> Result<Option<MediaRecord>> {
        let query = sqlx::query(SELECT_RECORD)
            .bind(origin.as_str())
            .bind(media_id)
            .fetch_optional(&self.pool);

        let row = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            row = query => row.map_err(db_error)?,
        };

        row.map(row_to_record).transpose()
    }

    async fn create_media_metadata(
        &self,
        record: &MediaRecord,
        ctx: &CancellationToken,
    ) -> Result<()> {
        let query = sqlx::query(INSERT_RECORD)
            .bind(record.origin.as_str())
            .bind(&record.media_id)
            .bind(&record.sha256_hex)
            .bind(record.size_bytes as i64)
            .bind(record.content_type.as_deref())
            .bind(record.upload_name.as_deref())
            .bind(&record.datastore_id)
            .bind(&record.location)
            .bind(record.quarantined)
            .bind(record.creation_ts as i64)
            .execute(&self.pool);

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            result = query => result,
        };
        result.map_err(db_error)?;
        Ok(())
    }

    async fn upsert_last_access(
        &self,
        sha256_hex: &str,
        now_millis: u64,
        ctx: &CancellationToken,
    ) -> Result<()> {
        let query = sqlx::query(UPSERT_LAST_ACCESS)
            .bind(sha256_hex)
            .bind(now_millis as i64)
            .execute(&self.pool);

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            result = query => result,
        };
        result.map_err(db_error)?;
        Ok(())
    }
}
