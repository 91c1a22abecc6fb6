//! Composition root: ingestion in, broadcast out, decoupled by the queue.
//!
//! [`FrameDistributor`] owns one [`FrameExtractor`], one [`FrameQueue`]
//! and a subscriber registry. The ingestion surface
//! ([`on_chunk`](FrameDistributor::on_chunk)) is driven by the producer
//! thread; the delivery surface
//! ([`poll_broadcast`](FrameDistributor::poll_broadcast),
//! [`poll_once`](FrameDistributor::poll_once)) by a consumer. The producer
//! is never reentered by subscriber code: ingestion only ever enqueues,
//! so producer latency cannot depend on a slow or failing consumer.
//!
//! # Example
//!
//! ```
//! use liveview_core::{FrameDistributor, FrameGuardConfig};
//!
//! let distributor = FrameDistributor::builder()
//!     .config(FrameGuardConfig::default())
//!     .queue_capacity(8)
//!     .build();
//!
//! let id = distributor
//!     .add_subscriber(|frame: &bytes::Bytes| {
//!         let _ = frame.len(); // hand off to a display loop, encoder, ...
//!     })
//!     .unwrap();
//!
//! let mut jpeg = vec![0xFF, 0xD8];
//! jpeg.resize(4094, 0xAB);
//! jpeg.extend_from_slice(&[0xFF, 0xD9]);
//!
//! assert!(distributor.on_chunk(&jpeg)); // a frame completed
//! assert_eq!(distributor.poll_broadcast(1), 1);
//! assert!(distributor.remove_subscriber(id));
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::warn;

use crate::config::{ConfigSource, FrameGuardConfig};
use crate::error::{Error, Result};
use crate::extractor::FrameExtractor;
use crate::queue::{FrameQueue, DEFAULT_CAPACITY};

/// Default bound on concurrently registered subscribers.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 1024;

/// A capability that consumes completed frames.
///
/// Implemented for any `Fn(&Bytes) + Send + Sync + 'static`, so plain
/// closures work; implement the trait directly for stateful sinks.
pub trait FrameSink: Send + Sync {
    /// Receive one complete frame.
    ///
    /// A panic here is caught by the distributor: it is not counted as an
    /// invocation and does not disturb sibling subscribers, later frames,
    /// or the registration itself.
    fn on_frame(&self, frame: &Bytes);
}

impl<F> FrameSink for F
where
    F: Fn(&Bytes) + Send + Sync + 'static,
{
    fn on_frame(&self, frame: &Bytes) {
        self(frame)
    }
}

/// Opaque subscriber handle. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Raw id value, e.g. for logging.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Registry state: sinks by id plus the id allocator.
struct Registry {
    sinks: HashMap<SubscriberId, Arc<dyn FrameSink>>,
    next_id: u64,
    max_subscribers: usize,
}

impl Registry {
    fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn FrameSink>)> {
        let mut entries: Vec<_> = self
            .sinks
            .iter()
            .map(|(id, sink)| (*id, sink.clone()))
            .collect();
        // Stable iteration order for one snapshot.
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

/// Owns the extraction/queue/broadcast pipeline for one live-view stream.
///
/// Share it as `Arc<FrameDistributor>`: one producer thread feeds
/// [`on_chunk`](Self::on_chunk), any number of consumer threads may call
/// the delivery methods (they are serialized internally).
pub struct FrameDistributor {
    /// Producer-side state. The mutex also serializes
    /// [`reload_config`](Self::reload_config) against appends.
    extractor: Mutex<FrameExtractor>,
    queue: FrameQueue,
    registry: Mutex<Registry>,
    /// Serializes delivery operations: one dequeue-plus-broadcast at a time.
    delivery_gate: Mutex<()>,
}

impl FrameDistributor {
    /// Create a distributor with defaults: environment-backed config,
    /// queue capacity 256, subscriber bound 1024.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building a customized distributor.
    pub fn builder() -> FrameDistributorBuilder {
        FrameDistributorBuilder::new()
    }

    /// Feed raw bytes from the stream source.
    ///
    /// Returns `true` iff the chunk completed a frame (which is now
    /// queued). Never invokes a subscriber and never blocks on consumer
    /// progress. Intended for a single producer thread; an empty chunk is
    /// ignored.
    pub fn on_chunk(&self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let frame = {
            let mut extractor = self.extractor.lock().expect("extractor lock");
            extractor.append(chunk)
        };
        match frame {
            Some(frame) => {
                self.queue.enqueue(frame);
                true
            }
            None => false,
        }
    }

    /// Register a subscriber; returns its id.
    ///
    /// Ids are strictly increasing and never reused, even after removal.
    ///
    /// # Errors
    ///
    /// [`Error::SubscriberCapacity`] when the registry bound is reached,
    /// the one registration failure that propagates instead of being
    /// masked.
    pub fn add_subscriber(&self, sink: impl FrameSink + 'static) -> Result<SubscriberId> {
        let mut registry = self.registry.lock().expect("registry lock");
        if registry.sinks.len() >= registry.max_subscribers {
            return Err(Error::SubscriberCapacity {
                limit: registry.max_subscribers,
            });
        }
        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;
        registry.sinks.insert(id, Arc::new(sink));
        Ok(id)
    }

    /// Remove a subscriber. Returns `true` iff the id was registered.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        self.registry
            .lock()
            .expect("registry lock")
            .sinks
            .remove(&id)
            .is_some()
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.registry.lock().expect("registry lock").sinks.clear();
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().expect("registry lock").sinks.len()
    }

    /// Dequeue up to `max_n` frames and broadcast each to every currently
    /// registered subscriber.
    ///
    /// Returns the total successful invocation count across all dequeued
    /// frames. A panicking subscriber is caught, skipped and not counted;
    /// siblings and remaining frames proceed. The registry is snapshotted
    /// per frame, so removal from inside a callback takes effect for the
    /// next frame and never deadlocks.
    pub fn poll_broadcast(&self, max_n: usize) -> usize {
        let _gate = self.delivery_gate.lock().expect("delivery gate");
        let mut invoked = 0;
        for _ in 0..max_n {
            let Some(frame) = self.queue.try_dequeue() else {
                break;
            };
            let snapshot = self.registry.lock().expect("registry lock").snapshot();
            for (id, sink) in snapshot {
                let outcome = catch_unwind(AssertUnwindSafe(|| sink.on_frame(&frame)));
                match outcome {
                    Ok(()) => invoked += 1,
                    Err(_) => warn!(subscriber = id.as_u64(), "subscriber panicked; skipped"),
                }
            }
        }
        invoked
    }

    /// Dequeue at most one frame without invoking any subscriber.
    ///
    /// The pull path for consumers that want raw bytes.
    pub fn poll_once(&self) -> Option<Bytes> {
        let _gate = self.delivery_gate.lock().expect("delivery gate");
        self.queue.try_dequeue()
    }

    /// Advisory queue occupancy.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Fixed queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Re-read extraction config from its source.
    ///
    /// Serialized against `on_chunk` by the extractor lock; buffered bytes
    /// are untouched. Never fails.
    pub fn reload_config(&self) {
        self.extractor.lock().expect("extractor lock").reload();
    }

    /// Current extraction config snapshot.
    pub fn config(&self) -> FrameGuardConfig {
        self.extractor.lock().expect("extractor lock").config().clone()
    }
}

impl Default for FrameDistributor {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring and creating a [`FrameDistributor`].
pub struct FrameDistributorBuilder {
    extractor: Option<FrameExtractor>,
    repair_segment: Option<Bytes>,
    queue_capacity: usize,
    max_subscribers: usize,
}

impl FrameDistributorBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            extractor: None,
            repair_segment: None,
            queue_capacity: DEFAULT_CAPACITY,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
        }
    }

    /// Use an explicit config snapshot (reloads fall back to the
    /// process environment).
    pub fn config(mut self, config: FrameGuardConfig) -> Self {
        self.extractor = Some(FrameExtractor::with_config(config));
        self
    }

    /// Use a custom config source for the initial load and every reload.
    pub fn config_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.extractor = Some(FrameExtractor::with_source(source));
        self
    }

    /// Replace the repair segment injected into frames that lack one.
    pub fn repair_segment(mut self, segment: impl Into<Bytes>) -> Self {
        self.repair_segment = Some(segment.into());
        self
    }

    /// Set the frame queue capacity. Default: 256.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the subscriber registry bound. Default: 1024.
    pub fn max_subscribers(mut self, limit: usize) -> Self {
        self.max_subscribers = limit;
        self
    }

    /// Build the distributor.
    pub fn build(self) -> FrameDistributor {
        let mut extractor = self.extractor.unwrap_or_default();
        if let Some(segment) = self.repair_segment {
            extractor = extractor.with_repair_segment(segment);
        }
        FrameDistributor {
            extractor: Mutex::new(extractor),
            queue: FrameQueue::new(self.queue_capacity),
            registry: Mutex::new(Registry {
                sinks: HashMap::new(),
                next_id: 1,
                max_subscribers: self.max_subscribers,
            }),
            delivery_gate: Mutex::new(()),
        }
    }
}

impl Default for FrameDistributorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
