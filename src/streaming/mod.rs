//! Per-request stream accumulation.
//!
//! Streamed responses re-enter the post hook one chunk at a time. Each
//! in-flight stream owns a mutex-guarded [`StreamAccumulator`] in a
//! process-wide registry; the single completion transition hands the caller
//! the full chunk set exactly once, which gates the commit. The commit path
//! is the only deleter; a periodic GC reclaims accumulators abandoned by
//! disconnected streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::constants::ACCUMULATOR_MAX_AGE;
use crate::model::GenerationResponse;

/// One received chunk with its arrival timestamp.
#[derive(Debug, Clone)]
pub struct TimedChunk {
    /// The chunk, when the provider delivered one alongside the event.
    pub response: Option<GenerationResponse>,
    /// Receive time.
    pub received_at: Instant,
}

/// Write context captured from request state at the first chunk, so the
/// commit can run after the request state is gone.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Caller's cache partition.
    pub cache_key: String,
    /// Upstream provider.
    pub provider: String,
    /// Upstream model.
    pub model: String,
    /// Direct-tier fingerprint; absent for semantic-only postures.
    pub request_hash: Option<String>,
    /// Params fingerprint.
    pub params_hash: String,
    /// Request embedding; absent for direct-only postures.
    pub embedding: Option<Vec<f32>>,
    /// Effective TTL for the entry.
    pub ttl: Duration,
}

/// Everything the commit path needs, drained from an accumulator on its
/// completion transition.
#[derive(Debug)]
pub struct CompletedStream {
    /// Chunks in arrival order.
    pub chunks: Vec<TimedChunk>,
    /// Whether any chunk surfaced an upstream error.
    pub has_error: bool,
    /// Write context from the first chunk.
    pub write: Option<PendingWrite>,
}

#[derive(Debug)]
struct StreamAccumulator {
    chunks: Vec<TimedChunk>,
    has_error: bool,
    is_complete: bool,
    final_at: Option<Instant>,
    created_at: Instant,
    write: Option<PendingWrite>,
}

impl StreamAccumulator {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            has_error: false,
            is_complete: false,
            final_at: None,
            created_at: Instant::now(),
            write: None,
        }
    }
}

/// Process-wide map from request id to its stream accumulator.
#[derive(Default)]
pub struct AccumulatorRegistry {
    inner: DashMap<Uuid, Arc<Mutex<StreamAccumulator>>>,
}

impl AccumulatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one chunk for `request_id`.
    ///
    /// `write` is invoked only on the first chunk to capture the commit
    /// context. Returns the drained stream on the first transition to
    /// complete; every other call returns `None`. The caller must
    /// [`remove`](Self::remove) the entry once the commit path returns.
    pub fn record(
        &self,
        request_id: Uuid,
        chunk: Option<GenerationResponse>,
        error: bool,
        finished: bool,
        write: impl FnOnce() -> Option<PendingWrite>,
    ) -> Option<CompletedStream> {
        let accumulator = {
            let entry = self
                .inner
                .entry(request_id)
                .or_insert_with(|| Arc::new(Mutex::new(StreamAccumulator::new())));
            Arc::clone(entry.value())
        };

        let mut guard = accumulator.lock();

        if guard.chunks.is_empty() && guard.write.is_none() {
            guard.write = write();
        }
        if error {
            guard.has_error = true;
        }
        guard.chunks.push(TimedChunk {
            response: chunk,
            received_at: Instant::now(),
        });

        if (finished || error) && !guard.is_complete {
            guard.is_complete = true;
            guard.final_at = Some(Instant::now());
            return Some(CompletedStream {
                chunks: std::mem::take(&mut guard.chunks),
                has_error: guard.has_error,
                write: guard.write.take(),
            });
        }

        None
    }

    /// Drops the accumulator for `request_id`, if any.
    pub fn remove(&self, request_id: Uuid) {
        self.inner.remove(&request_id);
    }

    /// Reclaims accumulators whose first chunk is older than `max_age`.
    /// Returns how many were dropped.
    pub fn gc_stale(&self, max_age: Duration) -> usize {
        let stale: Vec<Uuid> = self
            .inner
            .iter()
            .filter(|entry| entry.value().lock().created_at.elapsed() > max_age)
            .map(|entry| *entry.key())
            .collect();

        for id in &stale {
            self.inner.remove(id);
        }
        stale.len()
    }

    /// Number of in-flight accumulators.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no streams are in flight.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Orders drained chunks for commit: by chunk index, stable, with chunks
/// that carried no response pushed to the end and dropped.
pub fn sort_chunks(mut chunks: Vec<TimedChunk>) -> Vec<GenerationResponse> {
    chunks.sort_by_key(|c| match &c.response {
        Some(response) => (false, response.extra.chunk_index.unwrap_or(u32::MAX)),
        None => (true, u32::MAX),
    });
    chunks.into_iter().filter_map(|c| c.response).collect()
}

/// Spawns the periodic accumulator GC. The task exits when `shutdown` is
/// set; ticks after that point are skipped.
pub fn spawn_gc_task(
    registry: Arc<AccumulatorRegistry>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            let reclaimed = registry.gc_stale(ACCUMULATOR_MAX_AGE);
            if reclaimed > 0 {
                debug!(reclaimed, "Reclaimed stale stream accumulators");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResponseExtra;

    fn chunk(index: u32, finish: Option<&str>) -> GenerationResponse {
        GenerationResponse {
            id: format!("chunk-{index}"),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test-model".to_string(),
            choices: vec![],
            usage: None,
            extra: ResponseExtra {
                chunk_index: Some(index),
                finish_reason: finish.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn write_ctx() -> PendingWrite {
        PendingWrite {
            cache_key: "k1".to_string(),
            provider: "test-provider".to_string(),
            model: "test-model".to_string(),
            request_hash: Some("abc".to_string()),
            params_hash: "def".to_string(),
            embedding: None,
            ttl: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_completion_transition_fires_exactly_once() {
        let registry = AccumulatorRegistry::new();
        let id = Uuid::new_v4();

        assert!(
            registry
                .record(id, Some(chunk(0, None)), false, false, || Some(write_ctx()))
                .is_none()
        );
        let done = registry
            .record(id, Some(chunk(1, Some("stop"))), false, true, || {
                Some(write_ctx())
            })
            .expect("final chunk completes the stream");

        assert_eq!(done.chunks.len(), 2);
        assert!(!done.has_error);
        assert!(done.write.is_some());

        // A straggler after completion must not re-trigger.
        assert!(
            registry
                .record(id, Some(chunk(2, Some("stop"))), false, true, || None)
                .is_none()
        );
    }

    #[test]
    fn test_write_context_captured_on_first_chunk_only() {
        let registry = AccumulatorRegistry::new();
        let id = Uuid::new_v4();

        registry.record(id, Some(chunk(0, None)), false, false, || Some(write_ctx()));
        let done = registry
            .record(id, Some(chunk(1, None)), false, true, || {
                panic!("write context must not be re-captured")
            })
            .unwrap();

        assert_eq!(done.write.unwrap().cache_key, "k1");
    }

    #[test]
    fn test_error_latches_and_completes() {
        let registry = AccumulatorRegistry::new();
        let id = Uuid::new_v4();

        registry.record(id, Some(chunk(0, None)), false, false, || Some(write_ctx()));
        let done = registry
            .record(id, None, true, false, || None)
            .expect("error completes the stream");

        assert!(done.has_error);
    }

    #[test]
    fn test_sort_chunks_orders_by_index_and_drops_empty() {
        let now = Instant::now();
        let chunks = vec![
            TimedChunk {
                response: Some(chunk(2, Some("stop"))),
                received_at: now,
            },
            TimedChunk {
                response: None,
                received_at: now,
            },
            TimedChunk {
                response: Some(chunk(0, None)),
                received_at: now,
            },
            TimedChunk {
                response: Some(chunk(1, None)),
                received_at: now,
            },
        ];

        let ordered = sort_chunks(chunks);
        let indices: Vec<u32> = ordered
            .iter()
            .map(|c| c.extra.chunk_index.unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_gc_reclaims_only_stale_accumulators() {
        let registry = AccumulatorRegistry::new();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();

        registry.record(stale, Some(chunk(0, None)), false, false, || None);
        registry.record(fresh, Some(chunk(0, None)), false, false, || None);

        assert_eq!(registry.gc_stale(Duration::ZERO), 2);
        assert!(registry.is_empty());

        registry.record(fresh, Some(chunk(0, None)), false, false, || None);
        assert_eq!(registry.gc_stale(Duration::from_secs(3600)), 0);
        assert_eq!(registry.len(), 1);
    }
}
