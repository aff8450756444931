// Outbound protocol envelope
//
// Requests the loader sends to the log server, as JSON text frames:
//   {"type": "open", "duration": 30, "timestamp": 12.5}
//   {"type": "metadata"}
//   {"type": "play", "timestamp": 40, "duration": 20, "id": 3}

use crate::types::{LoaderError, LoaderResult, RequestWindow};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Open a log view
    Open {
        duration: f64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        timestamp: Option<f64>,
    },
    /// Ask for the log metadata
    Metadata,
    /// Stream a time window; the server echoes `id` on the timeslices it sends back
    Play {
        timestamp: f64,
        duration: f64,
        id: u64,
    },
}

/// Sends requests over an open socket
pub struct ProtocolEnvelope {
    outbound: mpsc::UnboundedSender<String>,
    request_counter: Arc<AtomicU64>,
}

impl ProtocolEnvelope {
    /// `request_counter` outlives the socket so ids stay unique across reconnects
    pub fn new(outbound: mpsc::UnboundedSender<String>, request_counter: Arc<AtomicU64>) -> Self {
        Self {
            outbound,
            request_counter,
        }
    }

    pub fn send(&self, message: &OutboundMessage) -> LoaderResult<()> {
        let json = serde_json::to_string(message)?;
        debug!("Sending {}", json);
        self.outbound
            .send(json)
            .map_err(|_| LoaderError::NotConnected)
    }

    pub fn open(&self, duration: f64, timestamp: Option<f64>) -> LoaderResult<()> {
        self.send(&OutboundMessage::Open {
            duration,
            timestamp,
        })
    }

    pub fn metadata(&self) -> LoaderResult<()> {
        self.send(&OutboundMessage::Metadata)
    }

    /// Request the window's data; returns the id assigned to the request
    pub fn play(&self, window: &RequestWindow) -> LoaderResult<u64> {
        let id = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(&OutboundMessage::Play {
            timestamp: window.start_timestamp,
            duration: window.duration(),
            id,
        })?;
        Ok(id)
    }
}
