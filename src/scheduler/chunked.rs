// Chunked file scheduling
//
// Logs served as static chunks over HTTP. There is no socket: the loader pulls
// one `duration`-long chunk anchored at the playhead whenever the playhead
// leaves the chunk it last loaded.

use crate::config::{build_query_string, FileOptions, DEFAULT_BUFFER_LENGTH};
use crate::types::{LoaderError, LoaderResult, RawMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Where chunks come from
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Raw messages covering [start, start + duration)
    async fn fetch_chunk(&self, start: f64, duration: f64) -> LoaderResult<Vec<RawMessage>>;
}

/// Fetches chunks with `GET {url}?start=..&duration=..`
pub struct HttpChunkSource {
    client: reqwest::Client,
    url: String,
}

impl HttpChunkSource {
    pub fn new(url: impl Into<String>) -> LoaderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| LoaderError::Configuration(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn chunk_url(&self, start: f64, duration: f64) -> String {
        let query = build_query_string(&[
            ("start".to_string(), start.to_string()),
            ("duration".to_string(), duration.to_string()),
        ]);
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

/// Split a chunk body into messages: one per element of a JSON array, the
/// whole body for any other JSON value, a single binary message otherwise
pub fn split_chunk_body(body: &[u8]) -> Vec<RawMessage> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| RawMessage::Text(item.to_string()))
            .collect(),
        Ok(value) => vec![RawMessage::Text(value.to_string())],
        Err(_) => vec![RawMessage::Binary(body.to_vec())],
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn fetch_chunk(&self, start: f64, duration: f64) -> LoaderResult<Vec<RawMessage>> {
        let url = self.chunk_url(start, duration);
        debug!("Fetching chunk {}", url);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(split_chunk_body(&body))
    }
}

pub struct ChunkedFileScheduler {
    source: Arc<dyn ChunkSource>,
    duration: f64,
    initial_timestamp: f64,
    chunk_start: Option<f64>,
    open: bool,
}

impl ChunkedFileScheduler {
    pub fn new(options: &FileOptions, source: Arc<dyn ChunkSource>) -> LoaderResult<Self> {
        if options.url.trim().is_empty() {
            return Err(LoaderError::Configuration("url is required".to_string()));
        }
        let duration = options.duration.unwrap_or(DEFAULT_BUFFER_LENGTH);
        if !(duration > 0.0 && duration.is_finite()) {
            return Err(LoaderError::Configuration(format!(
                "chunk duration must be a positive number, got {}",
                duration
            )));
        }

        Ok(Self {
            source,
            duration,
            initial_timestamp: options.timestamp.unwrap_or(0.0),
            chunk_start: None,
            open: false,
        })
    }

    pub fn source(&self) -> Arc<dyn ChunkSource> {
        Arc::clone(&self.source)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Anchor of the chunk currently loaded
    pub fn chunk_start(&self) -> Option<f64> {
        self.chunk_start
    }

    /// Mark open; returns the anchor of the first chunk
    pub fn open(&mut self) -> LoaderResult<f64> {
        if self.open {
            return Err(LoaderError::AlreadyConnected);
        }
        self.open = true;
        Ok(self.initial_timestamp)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    /// Anchor to fetch for a playhead at `timestamp`, if it left the current chunk
    pub fn chunk_to_fetch(&self, timestamp: f64) -> Option<f64> {
        if !self.open {
            return None;
        }
        match self.chunk_start {
            Some(start) if start <= timestamp && timestamp < start + self.duration => None,
            _ => Some(timestamp),
        }
    }

    /// A chunk anchored at `start` was fetched
    pub fn commit(&mut self, start: f64) {
        self.chunk_start = Some(start);
    }
}
