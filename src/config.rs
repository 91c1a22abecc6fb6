//! Reloadable extraction configuration and its key/value sources.
//!
//! [`FrameGuardConfig`] is an immutable snapshot of the four extraction
//! knobs. It is (re)loaded on demand from a [`ConfigSource`], which is
//! any string-keyed lookup: the process environment, an in-memory map, or
//! a JSON file. Loading never fails: absent or malformed values fall back to
//! the documented defaults, so a bad deployment can degrade behavior but
//! never take the feed down.
//!
//! # Example
//!
//! ```
//! use liveview_core::config::{ConfigSource, FrameGuardConfig, MapSource};
//!
//! let source = MapSource::new()
//!     .with("MAX_FRAME_BYTES", "65536")
//!     .with("INJECT_REPAIR_SEGMENT", "off");
//!
//! let config = FrameGuardConfig::load(&source);
//! assert_eq!(config.max_bytes, 65536);
//! assert!(!config.inject_repair_segment);
//! assert_eq!(config.timeout_ms, 300); // absent -> default
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Key: accumulation buffer cap in bytes.
pub const KEY_MAX_FRAME_BYTES: &str = "MAX_FRAME_BYTES";
/// Key: staleness window in milliseconds.
pub const KEY_FRAME_TIMEOUT_MS: &str = "FRAME_TIMEOUT_MS";
/// Key: whether to patch a missing repair segment into extracted frames.
pub const KEY_INJECT_REPAIR_SEGMENT: &str = "INJECT_REPAIR_SEGMENT";
/// Key: whether extraction runs at all (vs. raw passthrough capture).
pub const KEY_FRAME_GUARD_ENABLED: &str = "FRAME_GUARD_ENABLED";

/// Default accumulation buffer cap (20 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 20 * 1024 * 1024;
/// Default staleness window (300 ms).
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 300;

/// Immutable snapshot of extraction behavior.
///
/// Reloading replaces the snapshot; it never mutates buffered data, only
/// future behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGuardConfig {
    /// Accumulation buffer cap; exceeding it triggers prefix eviction.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Staleness window; an append gap longer than this discards the buffer.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Patch a missing repair segment into extracted frames.
    #[serde(default = "default_true")]
    pub inject_repair_segment: bool,
    /// Extraction enabled; when false, appends accumulate without extraction.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_FRAME_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl Default for FrameGuardConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_FRAME_BYTES,
            timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            inject_repair_segment: true,
            enabled: true,
        }
    }
}

impl FrameGuardConfig {
    /// Load a snapshot from a source.
    ///
    /// Never fails: each absent or malformed value falls back to its
    /// default, independently of the others.
    pub fn load(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: parse_int(source.get(KEY_MAX_FRAME_BYTES)).unwrap_or(defaults.max_bytes),
            timeout_ms: parse_int(source.get(KEY_FRAME_TIMEOUT_MS)).unwrap_or(defaults.timeout_ms),
            inject_repair_segment: parse_bool(source.get(KEY_INJECT_REPAIR_SEGMENT))
                .unwrap_or(defaults.inject_repair_segment),
            enabled: parse_bool(source.get(KEY_FRAME_GUARD_ENABLED)).unwrap_or(defaults.enabled),
        }
    }
}

fn parse_int<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    let v = value?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None, // malformed: fail open to the default
    }
}

/// A pluggable string key/value lookup backing config reloads.
///
/// Implementations must be cheap to query; `get` is called once per key
/// per reload, never on the append path.
pub trait ConfigSource: Send {
    /// Look up a raw value by key.
    fn get(&self, key: &str) -> Option<String>;
}

/// Config source backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Config source backed by an in-memory map.
///
/// Useful for tests and for hosts that resolve configuration themselves.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    /// Create an empty map source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Insert a key/value pair in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Config source backed by a flat JSON object file.
///
/// The file is read once at construction; call [`JsonFileSource::open`]
/// again to pick up file changes. Values may be JSON strings, numbers or
/// booleans; nested values are ignored.
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource {
    values: HashMap<String, String>,
}

impl JsonFileSource {
    /// Read and parse the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    /// A valid JSON document that is not an object yields an empty source.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        let mut values = HashMap::new();
        if let serde_json::Value::Object(map) = value {
            for (k, v) in map {
                let flat = match v {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                values.insert(k, flat);
            }
        }
        Ok(Self { values })
    }
}

impl ConfigSource for JsonFileSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
