//! Incremental frame extraction from an unaligned byte stream.
//!
//! Live-view sources deliver image data as arbitrary fragments: chunks
//! carry no alignment to frame boundaries, may omit the Huffman table a
//! decoder requires, and may stall or corrupt mid-frame. [`FrameExtractor`]
//! accumulates fragments in a single `BytesMut` buffer and hands back a
//! complete marker-delimited frame as soon as one exists.
//!
//! Malformed input is never an error. Corruption, truncation and staleness
//! are resolved by silent discard-and-continue: a live preview tolerates a
//! lost frame, not added latency or a crash. Two independent pressure
//! valves bound the buffer: a size cap with prefix eviction, and a
//! staleness window that discards fragments an append gap has orphaned.
//!
//! # Example
//!
//! ```
//! use liveview_core::{FrameExtractor, FrameGuardConfig};
//!
//! let mut extractor = FrameExtractor::with_config(FrameGuardConfig::default());
//!
//! let mut frame = vec![0xFF, 0xD8];
//! frame.resize(4094, 0xAB);
//! frame.extend_from_slice(&[0xFF, 0xD9]);
//!
//! // Boundaries do not matter: feed the frame in two halves.
//! assert!(extractor.append(&frame[..1000]).is_none());
//! let out = extractor.append(&frame[1000..]).expect("complete frame");
//! assert_eq!(&out[..2], &[0xFF, 0xD8]);
//! assert_eq!(&out[out.len() - 2..], &[0xFF, 0xD9]);
//! ```

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::{ConfigSource, EnvSource, FrameGuardConfig};
use crate::markers::{contains_marker, find_marker, DEFAULT_REPAIR_SEGMENT, DHT, EOI, MIN_FRAME_LEN, SOI};

/// Initial accumulation buffer capacity (64 KiB).
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Reassembles an append-only byte stream into self-contained frames,
/// bounded in memory and staleness.
///
/// Not internally synchronized: exactly one producer may call
/// [`append`](Self::append), and [`reload`](Self::reload) must be
/// externally serialized against concurrent appends.
pub struct FrameExtractor {
    /// Accumulated fragments; only ever cleared or prefix-trimmed.
    buffer: BytesMut,
    /// Current behavior snapshot.
    config: FrameGuardConfig,
    /// Source for [`reload`](Self::reload).
    source: Box<dyn ConfigSource>,
    /// Segment inserted when the repair marker is absent.
    repair_segment: Bytes,
    /// Timestamp of the previous append, for the staleness window.
    last_append: Instant,
}

impl FrameExtractor {
    /// Create an extractor configured from the process environment.
    pub fn new() -> Self {
        Self::with_source(EnvSource)
    }

    /// Create an extractor configured from a custom source.
    ///
    /// The source is retained and re-read on [`reload`](Self::reload).
    pub fn with_source(source: impl ConfigSource + 'static) -> Self {
        let config = FrameGuardConfig::load(&source);
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            config,
            source: Box::new(source),
            repair_segment: Bytes::from_static(DEFAULT_REPAIR_SEGMENT),
            last_append: Instant::now(),
        }
    }

    /// Create an extractor with an explicit snapshot.
    ///
    /// [`reload`](Self::reload) falls back to the process environment.
    pub fn with_config(config: FrameGuardConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            config,
            source: Box::new(EnvSource),
            repair_segment: Bytes::from_static(DEFAULT_REPAIR_SEGMENT),
            last_append: Instant::now(),
        }
    }

    /// Replace the repair segment inserted for frames missing one.
    ///
    /// Must begin with the repair marker bytes; content is otherwise
    /// opaque to the extractor.
    pub fn with_repair_segment(mut self, segment: impl Into<Bytes>) -> Self {
        self.repair_segment = segment.into();
        self
    }

    /// Append a chunk and try to extract one complete frame.
    ///
    /// This is the whole ingestion state machine; it never fails and never
    /// blocks. Returns `Some(frame)` when the chunk completes a
    /// marker-delimited frame, `None` while more data is needed or when a
    /// malformed stretch was discarded.
    pub fn append(&mut self, chunk: &[u8]) -> Option<Bytes> {
        if !self.config.enabled {
            // Passthrough capture: accumulate only, no extraction.
            self.buffer.extend_from_slice(chunk);
            self.last_append = Instant::now();
            return None;
        }

        self.discard_if_stale();
        self.buffer.extend_from_slice(chunk);
        self.last_append = Instant::now();

        self.trim_if_oversize();
        self.try_extract_one()
    }

    /// Re-read configuration from the source.
    ///
    /// Buffered bytes are untouched; only future appends see the new
    /// snapshot. Never fails; malformed values fall back to defaults.
    pub fn reload(&mut self) {
        self.config = FrameGuardConfig::load(&*self.source);
        debug!(
            max_bytes = self.config.max_bytes,
            timeout_ms = self.config.timeout_ms,
            inject = self.config.inject_repair_segment,
            enabled = self.config.enabled,
            "frame guard config reloaded"
        );
    }

    /// Current behavior snapshot.
    pub fn config(&self) -> &FrameGuardConfig {
        &self.config
    }

    /// Number of buffered bytes awaiting a frame boundary.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the accumulation buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Drop the buffer if the gap since the previous append exceeds the
    /// staleness window. A partial frame spanning such a gap cannot be
    /// trusted.
    fn discard_if_stale(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let gap = self.last_append.elapsed();
        if gap > Duration::from_millis(self.config.timeout_ms) {
            debug!(
                dropped = self.buffer.len(),
                gap_ms = gap.as_millis() as u64,
                "stale fragments discarded"
            );
            self.buffer.clear();
        }
    }

    /// Relieve size pressure: past the cap, evict everything before the
    /// first start marker at a nonzero offset, or everything when no start
    /// marker exists at all.
    fn trim_if_oversize(&mut self) {
        if self.buffer.len() <= self.config.max_bytes {
            return;
        }
        match find_marker(&self.buffer, SOI, 0) {
            Some(0) => {}
            Some(start) => {
                debug!(trimmed = start, "oversize buffer trimmed to start marker");
                let _ = self.buffer.split_to(start);
            }
            None => {
                debug!(dropped = self.buffer.len(), "oversize buffer had no start marker");
                self.buffer.clear();
            }
        }
    }

    /// Scan for the earliest complete marker pair and extract it.
    ///
    /// At most one candidate is considered per call; a discarded runt is
    /// not rescanned until the next append.
    fn try_extract_one(&mut self) -> Option<Bytes> {
        let start = find_marker(&self.buffer, SOI, 0)?;
        let eoi = find_marker(&self.buffer, EOI, start + 2)?;
        let end = eoi + 2;

        if end - start < MIN_FRAME_LEN {
            // Spurious marker pair; consume it so the same bytes are not
            // retried forever.
            trace!(len = end - start, "runt candidate discarded");
            let _ = self.buffer.split_to(end);
            return None;
        }

        // Evicts leading garbage and the consumed frame in one cut.
        let segment = self.buffer.split_to(end).freeze();
        let frame = segment.slice(start..);
        trace!(len = frame.len(), skipped = start, "frame extracted");

        if self.config.inject_repair_segment && !contains_marker(&frame, DHT) {
            return Some(self.patch_repair_segment(&frame));
        }
        Some(frame)
    }

    /// Insert the repair segment immediately after the start marker.
    fn patch_repair_segment(&self, frame: &Bytes) -> Bytes {
        let mut patched = BytesMut::with_capacity(frame.len() + self.repair_segment.len());
        patched.extend_from_slice(&frame[..2]);
        patched.extend_from_slice(&self.repair_segment);
        patched.extend_from_slice(&frame[2..]);
        trace!(len = patched.len(), "repair segment injected");
        patched.freeze()
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::DEFAULT_REPAIR_SEGMENT;

    const HUGE_TIMEOUT: u64 = 1_000_000_000;

    /// Extractor with an explicit snapshot, immune to the host environment.
    fn extractor(max_bytes: usize, timeout_ms: u64, inject: bool) -> FrameExtractor {
        FrameExtractor::with_config(FrameGuardConfig {
            max_bytes,
            timeout_ms,
            inject_repair_segment: inject,
            enabled: true,
        })
    }

    /// A marker-delimited frame of `total_len` bytes with 0xAB filler
    /// (never forms a spurious marker).
    fn make_frame(total_len: usize) -> Vec<u8> {
        assert!(total_len >= 4);
        let mut frame = vec![0xFF, 0xD8];
        frame.resize(total_len - 2, 0xAB);
        frame.extend_from_slice(&[0xFF, 0xD9]);
        frame
    }

    /// Same, but with a DHT marker embedded mid-frame.
    fn make_frame_with_dht(total_len: usize) -> Vec<u8> {
        let mut frame = make_frame(total_len);
        let mid = total_len / 2;
        frame[mid] = 0xFF;
        frame[mid + 1] = 0xC4;
        frame
    }

    #[test]
    fn test_whole_frame_in_one_chunk() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        let frame = make_frame(4096);

        let out = ex.append(&frame).expect("frame");
        assert_eq!(&out[..], &frame[..]);
        assert!(ex.is_empty());
    }

    #[test]
    fn test_output_is_marker_bounded() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, true);
        let mut stream = vec![0x00; 137]; // leading garbage
        stream.extend_from_slice(&make_frame(3000));

        let out = ex.append(&stream).expect("frame");
        assert_eq!(&out[..2], &SOI);
        assert_eq!(&out[out.len() - 2..], &EOI);
    }

    #[test]
    fn test_chunking_invariance() {
        let frame = make_frame(5000);

        let mut whole = extractor(1 << 20, HUGE_TIMEOUT, false);
        let expected = whole.append(&frame).expect("frame");

        for chunk_size in [1, 7, 333, 4999] {
            let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
            let mut got = None;
            for chunk in frame.chunks(chunk_size) {
                if let Some(f) = ex.append(chunk) {
                    assert!(got.is_none(), "only one frame expected");
                    got = Some(f);
                }
            }
            assert_eq!(got.as_deref(), Some(&expected[..]), "chunk_size {chunk_size}");
        }
    }

    #[test]
    fn test_runt_candidate_discarded_then_recovery() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);

        // Marker pair spanning fewer than MIN_FRAME_LEN bytes.
        let runt = make_frame(64);
        assert!(ex.append(&runt).is_none());
        assert!(ex.is_empty(), "runt must be consumed, not retried");

        let frame = make_frame(4096);
        let out = ex.append(&frame).expect("extraction resumes after runt");
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn test_runt_and_frame_in_same_chunk() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        let frame = make_frame(4096);

        let mut stream = make_frame(64);
        stream.extend_from_slice(&frame);

        // First append consumes the runt only; the frame is found on the
        // next append.
        assert!(ex.append(&stream).is_none());
        let out = ex.append(&[]).expect("frame behind runt");
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn test_oversize_markerless_garbage_then_frame() {
        let mut ex = extractor(4096, HUGE_TIMEOUT, false);

        // Well past max_bytes of marker-free noise, in fragments.
        let noise = vec![0x55u8; 1000];
        for _ in 0..20 {
            assert!(ex.append(&noise).is_none());
        }
        assert!(ex.len() <= 4096, "buffer must stay bounded");

        let frame = make_frame(3000);
        let out = ex.append(&frame).expect("frame after garbage flood");
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn test_oversize_trims_to_start_marker() {
        // max_bytes small enough that garbage + frame overflows on append.
        let mut ex = extractor(2048, HUGE_TIMEOUT, false);

        let garbage = vec![0x21u8; 500];
        let frame = make_frame(2598);
        let mut stream = garbage.clone();
        stream.extend_from_slice(&frame);

        let out = ex.append(&stream).expect("frame survives the trim");
        assert_eq!(out.len(), frame.len());
        assert_eq!(&out[..], &frame[..]);
        assert!(ex.is_empty(), "garbage must not linger in the buffer");
    }

    #[test]
    fn test_staleness_discards_partial_frame() {
        let mut ex = extractor(1 << 20, 30, false);
        let frame = make_frame(4096);

        assert!(ex.append(&frame[..2000]).is_none());
        std::thread::sleep(Duration::from_millis(80));

        // A+B would form a valid frame, but A is stale and discarded.
        assert!(ex.append(&frame[2000..]).is_none());
        assert_eq!(ex.len(), frame.len() - 2000);
    }

    #[test]
    fn test_fresh_appends_within_window_still_extract() {
        let mut ex = extractor(1 << 20, 5000, false);
        let frame = make_frame(4096);

        assert!(ex.append(&frame[..2000]).is_none());
        std::thread::sleep(Duration::from_millis(10));
        assert!(ex.append(&frame[2000..]).is_some());
    }

    #[test]
    fn test_disabled_is_passthrough_capture() {
        let mut ex = FrameExtractor::with_config(FrameGuardConfig {
            enabled: false,
            ..FrameGuardConfig::default()
        });
        let frame = make_frame(4096);

        assert!(ex.append(&frame).is_none());
        assert_eq!(ex.len(), frame.len(), "bytes accumulate unextracted");
    }

    #[test]
    fn test_repair_segment_injected_when_missing() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, true);
        let frame = make_frame(4096);

        let out = ex.append(&frame).expect("frame");
        assert_eq!(out.len(), frame.len() + DEFAULT_REPAIR_SEGMENT.len());
        assert_eq!(&out[..2], &SOI);
        assert_eq!(
            &out[2..2 + DEFAULT_REPAIR_SEGMENT.len()],
            DEFAULT_REPAIR_SEGMENT
        );
        assert_eq!(&out[2 + DEFAULT_REPAIR_SEGMENT.len()..], &frame[2..]);
    }

    #[test]
    fn test_repair_segment_not_duplicated() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, true);
        let frame = make_frame_with_dht(4096);

        let out = ex.append(&frame).expect("frame");
        assert_eq!(&out[..], &frame[..], "frame with DHT passes unmodified");
    }

    #[test]
    fn test_custom_repair_segment() {
        let segment = vec![0xFF, 0xC4, 0x00, 0x02];
        let mut ex = FrameExtractor::with_config(FrameGuardConfig {
            timeout_ms: HUGE_TIMEOUT,
            ..FrameGuardConfig::default()
        })
        .with_repair_segment(segment.clone());

        let frame = make_frame(4096);
        let out = ex.append(&frame).expect("frame");
        assert_eq!(&out[2..2 + segment.len()], &segment[..]);
    }

    #[test]
    fn test_unmatched_start_marker_retained() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        let frame = make_frame(4096);

        assert!(ex.append(&frame[..frame.len() - 1]).is_none());
        assert_eq!(ex.len(), frame.len() - 1, "partial frame waits for more data");

        let out = ex.append(&frame[frame.len() - 1..]).expect("frame");
        assert_eq!(&out[..], &frame[..]);
    }

    #[test]
    fn test_trailing_bytes_survive_extraction() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        let first = make_frame(4096);
        let second = make_frame(3000);

        let mut stream = first.clone();
        stream.extend_from_slice(&second[..100]);

        let out = ex.append(&stream).expect("first frame");
        assert_eq!(&out[..], &first[..]);
        assert_eq!(ex.len(), 100);

        let out = ex.append(&second[100..]).expect("second frame");
        assert_eq!(&out[..], &second[..]);
    }

    #[test]
    fn test_empty_chunk_is_harmless() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        assert!(ex.append(&[]).is_none());
        assert!(ex.is_empty());
    }

    #[test]
    fn test_reload_changes_future_behavior_only() {
        let source = crate::config::MapSource::new()
            .with(crate::config::KEY_FRAME_TIMEOUT_MS, HUGE_TIMEOUT.to_string())
            .with(crate::config::KEY_INJECT_REPAIR_SEGMENT, "off");
        let mut ex = FrameExtractor::with_source(source);
        assert!(!ex.config().inject_repair_segment);

        ex.append(&[0x01, 0x02, 0x03]);
        let buffered = ex.len();
        ex.reload();
        assert_eq!(ex.len(), buffered, "reload must not touch buffered data");
    }

    #[test]
    fn test_clear_resets_buffer() {
        let mut ex = extractor(1 << 20, HUGE_TIMEOUT, false);
        ex.append(&[0xFF, 0xD8, 0x00]);
        assert!(!ex.is_empty());
        ex.clear();
        assert!(ex.is_empty());
    }
}
