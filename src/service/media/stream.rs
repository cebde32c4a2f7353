// =============================================================================
// Mediaron Federated Media Repository - Byte Stream Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   The byte stream type flowing through the download core, plus the small
//   set of constructors and drains the core and its tests need.
//
// =============================================================================

use std::pin::Pin;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};

use crate::{Error, Result};

/// A single-consumer readable byte source.
///
/// Chunk boundaries carry no meaning; consumers must treat the stream as one
/// contiguous byte sequence.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Wraps fully-buffered contents as a single-chunk stream.
pub fn from_bytes(bytes: Bytes) -> ByteStream {
    Box::pin(stream::once(async move { Ok(bytes) }))
}

/// Drains `stream` into memory, failing with [`Error::SizeLimit`] as soon as
/// more than `limit` bytes arrive.
pub async fn collect(mut stream: ByteStream, limit: Option<u64>) -> Result<Vec<u8>> {
    let mut contents = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if let Some(limit) = limit {
            if (contents.len() as u64).saturating_add(chunk.len() as u64) > limit {
                return Err(Error::SizeLimit(format!(
                    "stream exceeds the {limit} byte limit"
                )));
            }
        }
        contents.extend_from_slice(&chunk);
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_bytes_roundtrip() {
        let stream = from_bytes(Bytes::from_static(b"hello media"));
        let contents = collect(stream, None).await.unwrap();
        assert_eq!(contents, b"hello media");
    }

    #[tokio::test]
    async fn test_collect_enforces_limit() {
        let chunks = vec![
            Ok(Bytes::from_static(&[0u8; 600])),
            Ok(Bytes::from_static(&[0u8; 600])),
        ];
        let stream: ByteStream = Box::pin(stream::iter(chunks));
        let err = collect(stream, Some(1000)).await.unwrap_err();
        assert!(matches!(err, Error::SizeLimit(_)));
    }

    #[tokio::test]
    async fn test_collect_surfaces_stream_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"head")),
            Err(Error::UpstreamUnavailable("connection reset".to_owned())),
        ];
        let stream: ByteStream = Box::pin(stream::iter(chunks));
        let err = collect(stream, None).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}
