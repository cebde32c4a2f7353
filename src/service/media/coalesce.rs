// =============================================================================
// Mediaron Federated Media Repository - Request Coalescer Module
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
//   Keyed coalescing of in-flight executions. Concurrent callers presenting
//   the same key join a single body execution; on success a post-processing
//   step mints one value per surviving caller (for results that cannot be
//   shared raw, such as live byte streams). Bodies run on their own task, so
//   no individual caller's cancellation can abort work other callers are
//   still waiting on.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//
// Features:
//   • Single execution per key at a time
//   • Per-waiter result minting via post-processing
//   • Shared-value fast path for immutable results
//   • Waiter recount at completion (cancelled callers free their slot)
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
    future::Future,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

type Waiter<V> = oneshot::Sender<Result<V>>;

/// Keyed map of in-flight executions.
///
/// Cheap to clone; clones share one in-flight table. All locking is internal
/// and the table mutex is never held across an await point.
pub struct RequestCoalescer<V> {
    in_flight: Arc<StdMutex<HashMap<String, Vec<Waiter<V>>>>>,
}

impl<V> Clone for RequestCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<V> Default for RequestCoalescer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestCoalescer<V> {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }
}

impl<V: Send + 'static> RequestCoalescer<V> {
    /// Runs `body` for `key`, or joins the execution already in flight.
    ///
    /// When the body succeeds, `post_process(value, waiter_count)` is invoked
    /// exactly once to mint one value per caller still waiting; caller `i`
    /// receives `values[i]`. When it fails, every waiter receives a clone of
    /// the error. Cancelling `ctx` releases only this caller's wait; the body
    /// keeps running for the benefit of the others.
    pub async fn run<B, P>(
        &self,
        key: &str,
        body: B,
        post_process: P,
        ctx: &CancellationToken,
    ) -> Result<V>
    where
        B: Future<Output = Result<V>> + Send + 'static,
        P: FnOnce(V, usize) -> Result<Vec<V>> + Send + 'static,
    {
        let receiver = self.join(key, body, post_process);

        tokio::select! {
            result = receiver => result.unwrap_or_else(|_| {
                Err(Error::Internal(
                    "coalesced execution dropped its waiters".to_owned(),
                ))
            }),
            _ = ctx.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Like [`RequestCoalescer::run`], but every waiter receives a clone of
    /// the same value. Only safe for results that are shareable as-is.
    pub async fn run_shared<B>(&self, key: &str, body: B, ctx: &CancellationToken) -> Result<V>
    where
        V: Clone,
        B: Future<Output = Result<V>> + Send + 'static,
    {
        self.run(key, body, |value, waiter_count| Ok(vec![value; waiter_count]), ctx)
            .await
    }

    /// Registers a waiter for `key` and spawns the body when this caller is
    /// the first one in.
    fn join<B, P>(&self, key: &str, body: B, post_process: P) -> oneshot::Receiver<Result<V>>
    where
        B: Future<Output = Result<V>> + Send + 'static,
        P: FnOnce(V, usize) -> Result<Vec<V>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let leads = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.entry(key.to_owned()) {
                Entry::Occupied(mut entry) => {
                    debug!("Joining in-flight execution for {key}");
                    entry.get_mut().push(sender);
                    false
                }
                Entry::Vacant(entry) => {
                    entry.insert(vec![sender]);
                    true
                }
            }
        };

        if leads {
            let table = Arc::clone(&self.in_flight);
            let key = key.to_owned();
            tokio::spawn(async move {
                let result = body.await;

                let waiters = table.lock().unwrap().remove(&key).unwrap_or_default();
                // Recount: callers that cancelled no longer hold a receiver
                // and must not consume a post-process slot.
                let live: Vec<Waiter<V>> = waiters
                    .into_iter()
                    .filter(|waiter| !waiter.is_closed())
                    .collect();

                match result {
                    Ok(value) => match post_process(value, live.len()) {
                        Ok(values) => {
                            if values.len() != live.len() {
                                warn!(
                                    "Post-processing for {key} minted {} values for {} waiters",
                                    values.len(),
                                    live.len()
                                );
                            }
                            for (waiter, value) in live.into_iter().zip(values) {
                                let _ = waiter.send(Ok(value));
                            }
                        }
                        Err(err) => {
                            for waiter in live {
                                let _ = waiter.send(Err(err.clone()));
                            }
                        }
                    },
                    Err(err) => {
                        for waiter in live {
                            let _ = waiter.send(Err(err.clone()));
                        }
                    }
                }
            });
        }

        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_single_caller_runs_body_once() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        let runs2 = Arc::clone(&runs);
        let value = coalescer
            .run_shared(
                "key",
                async move {
                    runs2.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                },
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let ctx = CancellationToken::new();

        let mut calls = Vec::new();
        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            calls.push(coalescer.run_shared(
                "key",
                async move {
                    gate.notified().await;
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(11)
                },
                &ctx,
            ));
        }

        // All five register on their first poll; only one body may run.
        let joined = futures_util::future::join_all(calls);
        gate.notify_one();
        let results = joined.await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), 11);
        }
    }

    #[tokio::test]
    async fn test_post_process_mints_per_waiter_values() {
        let coalescer: RequestCoalescer<usize> = RequestCoalescer::new();
        let observed_count = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        let mut calls = Vec::new();
        for _ in 0..4 {
            let observed = Arc::clone(&observed_count);
            calls.push(coalescer.run(
                "key",
                async { Ok(100) },
                move |base, waiter_count| {
                    observed.store(waiter_count, Ordering::SeqCst);
                    Ok((0..waiter_count).map(|i| base + i).collect())
                },
                &ctx,
            ));
        }

        let mut values: Vec<usize> = futures_util::future::join_all(calls)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect();
        values.sort_unstable();

        assert_eq!(observed_count.load(Ordering::SeqCst), 4);
        assert_eq!(values, vec![100, 101, 102, 103]);
    }

    #[tokio::test]
    async fn test_body_error_fans_out_to_every_waiter() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let ctx = CancellationToken::new();

        let calls = (0..3).map(|_| {
            coalescer.run_shared(
                "key",
                async { Err(Error::StorageUnavailable("db gone".to_owned())) },
                &ctx,
            )
        });

        for result in futures_util::future::join_all(calls).await {
            assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        }
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_consume_a_slot() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let gate = Arc::new(Notify::new());
        let observed_count = Arc::new(AtomicUsize::new(usize::MAX));
        let ctx_live = CancellationToken::new();
        let ctx_cancelled = CancellationToken::new();

        let mut live_calls = Vec::new();
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            let observed = Arc::clone(&observed_count);
            live_calls.push(tokio::spawn({
                let coalescer = coalescer.clone();
                let ctx = ctx_live.clone();
                async move {
                    coalescer
                        .run(
                            "key",
                            async move {
                                gate.notified().await;
                                Ok(5)
                            },
                            move |value, waiter_count| {
                                observed.store(waiter_count, Ordering::SeqCst);
                                Ok(vec![value; waiter_count])
                            },
                            &ctx,
                        )
                        .await
                }
            }));
        }

        let doomed = tokio::spawn({
            let coalescer = coalescer.clone();
            let ctx = ctx_cancelled.clone();
            let gate = Arc::clone(&gate);
            async move {
                coalescer
                    .run_shared(
                        "key",
                        async move {
                            gate.notified().await;
                            Ok(5)
                        },
                        &ctx,
                    )
                    .await
            }
        });

        // Let everyone register, cancel one caller, then release the body.
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx_cancelled.cancel();
        let cancelled_result = doomed.await.unwrap();
        assert!(matches!(cancelled_result, Err(Error::Cancelled)));

        gate.notify_one();
        for call in live_calls {
            assert_eq!(call.await.unwrap().unwrap(), 5);
        }
        assert_eq!(observed_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_executions_run_separately() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            let value = coalescer
                .run_shared(
                    "key",
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    },
                    &ctx,
                )
                .await
                .unwrap();
            assert_eq!(value, 1);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_concurrently() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        let a = {
            let runs = Arc::clone(&runs);
            coalescer.run_shared(
                "a",
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
                &ctx,
            )
        };
        let b = {
            let runs = Arc::clone(&runs);
            coalescer.run_shared(
                "b",
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(2)
                },
                &ctx,
            )
        };

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
