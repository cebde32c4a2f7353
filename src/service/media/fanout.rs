// =============================================================================
// Mediaron Federated Media Repository - Stream Fan-out Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Splits one readable byte stream into N independent copies. The source is
//   consumed exactly once by a driver task; each consumer reads through a
//   bounded channel at its own pace. Closing any subset of the outputs does
//   not starve the rest, and once every output is gone the source is dropped.
//
// =============================================================================

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::stream::ByteStream;
use crate::Result;

/// Per-consumer chunk buffer. A consumer lagging more than this many chunks
/// behind applies backpressure to the driver (and thereby to its siblings).
const CONSUMER_BUFFER_CHUNKS: usize = 64;

/// Produces `n` streams that each deliver the full byte sequence of `source`.
///
/// The source errors mid-stream are cloned to every live consumer at the
/// corresponding position, after which the fan-out stops.
pub fn clone_reader(source: ByteStream, n: usize) -> Vec<ByteStream> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![source];
    }

    let mut senders: Vec<Option<mpsc::Sender<Result<Bytes>>>> = Vec::with_capacity(n);
    let mut outputs: Vec<ByteStream> = Vec::with_capacity(n);
    for _ in 0..n {
        let (sender, receiver) = mpsc::channel(CONSUMER_BUFFER_CHUNKS);
        senders.push(Some(sender));
        outputs.push(Box::pin(ReceiverStream::new(receiver)));
    }

    tokio::spawn(async move {
        let mut source = source;
        let mut open = senders.len();
        while open > 0 {
            let item = match source.next().await {
                Some(item) => item,
                None => break,
            };
            let terminal = item.is_err();
            for slot in senders.iter_mut() {
                let Some(sender) = slot else { continue };
                let payload = match &item {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(err) => Err(err.clone()),
                };
                if sender.send(payload).await.is_err() {
                    // Consumer went away; skip it from now on.
                    *slot = None;
                    open -= 1;
                }
            }
            if terminal {
                break;
            }
        }
        if open == 0 {
            debug!("All fan-out consumers closed before the source finished");
        }
    });

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{service::media::stream, Error};
    use futures_util::stream::iter;

    fn chunked_source(chunks: Vec<Result<Bytes>>) -> ByteStream {
        Box::pin(iter(chunks))
    }

    #[tokio::test]
    async fn test_all_consumers_receive_full_sequence() {
        let source = chunked_source(vec![
            Ok(Bytes::from_static(b"one")),
            Ok(Bytes::from_static(b"two")),
            Ok(Bytes::from_static(b"three")),
        ]);

        let outputs = clone_reader(source, 3);
        assert_eq!(outputs.len(), 3);

        for output in outputs {
            let contents = stream::collect(output, None).await.unwrap();
            assert_eq!(contents, b"onetwothree");
        }
    }

    #[tokio::test]
    async fn test_dropping_one_consumer_does_not_starve_the_rest() {
        // More chunks than a consumer buffer holds, so the dropped consumer
        // would wedge the driver if it were not skipped.
        let chunks: Vec<Result<Bytes>> = (0..CONSUMER_BUFFER_CHUNKS * 3)
            .map(|i| Ok(Bytes::from(vec![i as u8; 32])))
            .collect();
        let expected: Vec<u8> = chunks
            .iter()
            .flat_map(|chunk| chunk.as_ref().unwrap().to_vec())
            .collect();

        let mut outputs = clone_reader(chunked_source(chunks), 2);
        let survivor = outputs.pop().unwrap();
        drop(outputs); // closes the first consumer immediately

        let contents = stream::collect(survivor, None).await.unwrap();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_source_error_reaches_every_consumer() {
        let source = chunked_source(vec![
            Ok(Bytes::from_static(b"head")),
            Err(Error::StorageUnavailable("read failed".to_owned())),
        ]);

        let outputs = clone_reader(source, 2);
        for mut output in outputs {
            let first = output.next().await.unwrap().unwrap();
            assert_eq!(first, Bytes::from_static(b"head"));
            let second = output.next().await.unwrap();
            assert!(matches!(second, Err(Error::StorageUnavailable(_))));
            assert!(output.next().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_single_consumer_passthrough() {
        let source = chunked_source(vec![Ok(Bytes::from_static(b"solo"))]);
        let mut outputs = clone_reader(source, 1);
        assert_eq!(outputs.len(), 1);
        let contents = stream::collect(outputs.pop().unwrap(), None).await.unwrap();
        assert_eq!(contents, b"solo");
    }

    #[tokio::test]
    async fn test_zero_consumers() {
        let source = chunked_source(vec![Ok(Bytes::from_static(b"unused"))]);
        assert!(clone_reader(source, 0).is_empty());
    }
}
