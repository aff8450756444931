// Common types for the playback loader

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors that can occur while loading a log
///
/// Payloads are plain strings so errors can be cloned into `error` events.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoaderError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Chunk fetch failed: {0}")]
    Fetch(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Socket already connected")]
    AlreadyConnected,

    #[error("Socket not connected")]
    NotConnected,
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}

/// Connection state of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

/// Per-stream payloads keyed by stream name
pub type StreamMap = BTreeMap<String, serde_json::Value>;

/// Stream name -> enabled flag
pub type StreamSettings = BTreeMap<String, bool>;

/// Log metadata as announced by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogMetadata {
    #[serde(default)]
    pub start_time: Option<f64>,

    #[serde(default)]
    pub end_time: Option<f64>,

    /// Stream declarations (name -> stream description)
    #[serde(default)]
    pub streams: StreamMap,
}

impl LogMetadata {
    /// Start time, or -inf when the log is unbounded
    pub fn start_or_min(&self) -> f64 {
        self.start_time.unwrap_or(f64::NEG_INFINITY)
    }

    /// End time, or +inf when the log is unbounded
    pub fn end_or_max(&self) -> f64 {
        self.end_time.unwrap_or(f64::INFINITY)
    }

    pub fn duration(&self) -> f64 {
        self.end_or_max() - self.start_or_min()
    }
}

/// One timestamped batch of incremental stream data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeslice {
    pub timestamp: f64,

    /// Id of the `play` request this timeslice answers, if the server echoes it
    #[serde(default)]
    pub request_id: Option<u64>,

    #[serde(default)]
    pub streams: StreamMap,
}

/// Undecoded frame as it came off the wire
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Decoded inbound message, discriminated by its tag
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Metadata(Arc<LogMetadata>),
    Timeslice(Arc<Timeslice>),
    Done,
    Unknown { tag: String },
}

/// Stream values visible at the playhead
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub look_ahead: f64,
    pub streams: StreamMap,
}

/// Window currently requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestWindow {
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub buffer_start: f64,
    pub buffer_end: f64,
}

impl RequestWindow {
    pub fn duration(&self) -> f64 {
        self.end_timestamp - self.start_timestamp
    }

    /// Whether `timestamp` falls in the target buffer window
    pub fn covers(&self, timestamp: f64) -> bool {
        self.buffer_start <= timestamp && timestamp <= self.buffer_end
    }
}

/// Counters about a loader session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderStats {
    pub timeslices_received: u64,
    pub stale_timeslices: u64,
    pub requests_issued: u64,
    pub chunks_fetched: u64,
    pub reconnects: u64,
    pub protocol_errors: u64,
}
