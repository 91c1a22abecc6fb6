//! # liveview-core
//!
//! Reassembly and distribution core for live camera preview streams.
//!
//! A live-view source delivers image data as an unstructured, possibly
//! fragmented byte stream: chunks arrive with no alignment to frame
//! boundaries, may omit metadata a decoder requires, and may stall or
//! corrupt mid-frame. This crate turns that stream into discrete,
//! independently decodable frames and fans them out to any number of
//! consumers without ever blocking the thread feeding it bytes.
//!
//! ## Architecture
//!
//! - [`FrameExtractor`]: incremental reassembly state machine over the
//!   raw byte stream, self-healing from corruption, staleness and
//!   unbounded growth.
//! - [`FrameQueue`]: lock-free fixed-capacity SPSC ring with a
//!   drop-oldest overwrite policy, bridging the producer and consumer
//!   roles.
//! - [`FrameDistributor`]: composition root with an ingestion surface
//!   (bytes in, producer-driven) and a delivery surface (callbacks out,
//!   consumer-driven), strictly decoupled through the queue.
//!
//! ## Example
//!
//! ```
//! use liveview_core::{FrameDistributor, FrameGuardConfig};
//!
//! // Producer role: the stream source's delivery thread.
//! let distributor = FrameDistributor::builder()
//!     .config(FrameGuardConfig::default())
//!     .build();
//!
//! let id = distributor
//!     .add_subscriber(|frame: &bytes::Bytes| {
//!         // display loop, network streamer, ...
//!         let _ = frame.len();
//!     })
//!     .unwrap();
//!
//! // Fragments arrive with arbitrary boundaries.
//! let mut jpeg = vec![0xFF, 0xD8];
//! jpeg.resize(4094, 0xAB);
//! jpeg.extend_from_slice(&[0xFF, 0xD9]);
//! distributor.on_chunk(&jpeg[..1500]);
//! distributor.on_chunk(&jpeg[1500..]);
//!
//! // Consumer role: drain and broadcast from a poll loop.
//! assert_eq!(distributor.poll_broadcast(1), 1);
//! distributor.remove_subscriber(id);
//! ```

pub mod config;
pub mod distributor;
pub mod error;
pub mod extractor;
pub mod markers;
pub mod queue;

pub use config::{ConfigSource, EnvSource, FrameGuardConfig, JsonFileSource, MapSource};
pub use distributor::{FrameDistributor, FrameDistributorBuilder, FrameSink, SubscriberId};
pub use error::{Error, Result};
pub use extractor::FrameExtractor;
pub use queue::FrameQueue;
