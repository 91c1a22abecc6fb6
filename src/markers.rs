//! JPEG marker constants and scan helpers.
//!
//! A live-view frame is delimited on the wire by two fixed 2-byte markers:
//! ```text
//! ┌──────────┬─────────────────────────┬──────────┐
//! │ SOI      │ entropy-coded data ...  │ EOI      │
//! │ FF D8    │ (opaque to this crate)  │ FF D9    │
//! └──────────┴─────────────────────────┴──────────┘
//! ```
//! Everything between the markers is opaque; the only interior structure
//! this crate ever looks for is the Huffman-table marker (`FF C4`), whose
//! absence some producers are known for and some decoders refuse.

/// Start-of-image marker. A frame begins with these two bytes.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End-of-image marker. A frame ends with these two bytes.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Huffman-table (DHT) marker. Frames missing it can be patched.
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Minimum plausible frame length, markers included.
///
/// Marker pairs spanning fewer bytes are noise (marker bytes occurring
/// inside entropy-coded data of a frame whose real SOI was lost) and are
/// discarded rather than emitted.
pub const MIN_FRAME_LEN: usize = 2048;

/// Canonical minimal DHT repair segment inserted right after SOI when
/// [`DHT`] is absent from an extracted frame.
///
/// The table content is a pluggable placeholder, not a standards-complete
/// table; decoders that validate table contents need a substitute via
/// [`FrameExtractor::with_repair_segment`](crate::FrameExtractor::with_repair_segment).
pub const DEFAULT_REPAIR_SEGMENT: &[u8] = &[
    0xFF, 0xC4, 0x00, 0x1F, // marker + declared segment length
    0x00, 0x00, 0x01, 0x05, 0x01, 0x01, 0x01, //
    0x01, 0x01, 0x01, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Find the first occurrence of a 2-byte marker at or after `from`.
///
/// Returns the offset of the marker's first byte, or `None`.
#[inline]
pub fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if buf.len() < 2 || from + 1 >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|i| from + i)
}

/// Check whether `buf` contains a 2-byte marker anywhere.
#[inline]
pub fn contains_marker(buf: &[u8], marker: [u8; 2]) -> bool {
    find_marker(buf, marker, 0).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_marker_at_start() {
        let buf = [0xFF, 0xD8, 0x00, 0x00];
        assert_eq!(find_marker(&buf, SOI, 0), Some(0));
    }

    #[test]
    fn test_find_marker_mid_buffer() {
        let buf = [0x00, 0x11, 0xFF, 0xD9, 0x22];
        assert_eq!(find_marker(&buf, EOI, 0), Some(2));
    }

    #[test]
    fn test_find_marker_respects_from() {
        let buf = [0xFF, 0xD8, 0x00, 0xFF, 0xD8];
        assert_eq!(find_marker(&buf, SOI, 1), Some(3));
        assert_eq!(find_marker(&buf, SOI, 4), None);
    }

    #[test]
    fn test_find_marker_absent() {
        let buf = [0x00, 0xFF, 0x00, 0xD8];
        assert_eq!(find_marker(&buf, SOI, 0), None);
    }

    #[test]
    fn test_find_marker_short_buffer() {
        assert_eq!(find_marker(&[], SOI, 0), None);
        assert_eq!(find_marker(&[0xFF], SOI, 0), None);
    }

    #[test]
    fn test_marker_straddles_nothing() {
        // A lone 0xFF at the end must not match.
        let buf = [0x00, 0x00, 0xFF];
        assert_eq!(find_marker(&buf, SOI, 0), None);
    }

    #[test]
    fn test_contains_marker() {
        let buf = [0x01, 0xFF, 0xC4, 0x02];
        assert!(contains_marker(&buf, DHT));
        assert!(!contains_marker(&buf, EOI));
    }

    #[test]
    fn test_repair_segment_starts_with_dht() {
        assert_eq!(&DEFAULT_REPAIR_SEGMENT[..2], &DHT);
    }
}
