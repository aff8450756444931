// Windowed request scheduling for seekable logs
//
// Keeps a bounded window of data around the playhead. Every seek outside the
// active request computes the part of the desired window not yet held, prunes
// the buffer to the new window, and asks the server for the missing span.

use crate::buffer::TimesliceStore;
use crate::config::RequestParams;
use crate::range::{self, ComplexRange, SimpleRange};
use crate::transport::ProtocolEnvelope;
use crate::types::{LoaderResult, LogMetadata, RequestWindow, Timeslice};
use tracing::debug;

/// Next window to request for a playhead at `timestamp`, or `None` when the
/// desired window is already held.
///
/// `buffer_length <= 0` means "buffer the whole log". The request spans from
/// the first missing piece to the last one, so held slivers between gaps may
/// be fetched again.
pub fn compute_next_request_window(
    timestamp: f64,
    metadata: &LogMetadata,
    buffer_length: f64,
    held: &ComplexRange,
) -> Option<RequestWindow> {
    let log_start = metadata.start_or_min();
    let log_end = metadata.end_or_max();
    let total = log_end - log_start;
    let chunk = if buffer_length > 0.0 {
        buffer_length
    } else {
        total
    };

    if chunk >= total {
        return Some(RequestWindow {
            start_timestamp: log_start,
            end_timestamp: log_end,
            buffer_start: log_start,
            buffer_end: log_end,
        });
    }

    let buffer_start = (timestamp - chunk / 2.0).max(log_start);
    let buffer_end = (buffer_start + chunk).min(log_end);
    let gaps = range::subtract(SimpleRange::new(buffer_start, buffer_end), held);

    let first = gaps.first()?;
    let last = gaps.last()?;
    Some(RequestWindow {
        start_timestamp: first.start,
        end_timestamp: last.end,
        buffer_start,
        buffer_end,
    })
}

/// What a reposition did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reposition {
    /// The buffer dropped data outside the new window
    pub pruned: bool,
    /// A new window became active
    pub window: Option<RequestWindow>,
    /// Id of the `play` request sent for it (None while the socket is closed)
    pub request_id: Option<u64>,
}

pub struct WindowScheduler {
    params: RequestParams,
    held: ComplexRange,
    active: Option<RequestWindow>,
    active_id: Option<u64>,
    log_opened: bool,
}

impl WindowScheduler {
    pub fn new(params: RequestParams) -> Self {
        Self {
            params,
            held: range::empty(),
            active: None,
            active_id: None,
            log_opened: false,
        }
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// Time ranges received for the active window
    pub fn held(&self) -> &ComplexRange {
        &self.held
    }

    pub fn active_request(&self) -> Option<&RequestWindow> {
        self.active.as_ref()
    }

    pub fn active_request_id(&self) -> Option<u64> {
        self.active_id
    }

    /// React to the playhead moving to `timestamp`
    pub fn reposition(
        &mut self,
        timestamp: f64,
        metadata: Option<&LogMetadata>,
        buffer: &mut dyn TimesliceStore,
        protocol: Option<&ProtocolEnvelope>,
    ) -> LoaderResult<Reposition> {
        let mut outcome = Reposition::default();

        if self.active.is_some_and(|active| active.covers(timestamp)) {
            return Ok(outcome);
        }
        let Some(metadata) = metadata else {
            return Ok(outcome);
        };
        let Some(window) = compute_next_request_window(
            timestamp,
            metadata,
            self.params.buffer_length,
            &self.held,
        ) else {
            return Ok(outcome);
        };

        debug!(
            "New request window [{}, {}] buffering [{}, {}]",
            window.start_timestamp, window.end_timestamp, window.buffer_start, window.buffer_end
        );

        outcome.pruned = buffer.update_fixed_buffer(window.buffer_start, window.buffer_end);
        self.held = range::intersect(
            SimpleRange::new(window.buffer_start, window.buffer_end),
            &self.held,
        );
        self.active = Some(window);
        self.active_id = None;
        outcome.window = Some(window);

        // Without a socket the request waits for on_open
        if let Some(protocol) = protocol {
            let id = protocol.play(&window)?;
            self.active_id = Some(id);
            outcome.request_id = Some(id);
        }

        Ok(outcome)
    }

    /// Socket (re)opened: replay the active request, open the log view on
    /// the first socket, or ask for metadata again on a later one
    pub fn on_open(&mut self, protocol: &ProtocolEnvelope) -> LoaderResult<Option<u64>> {
        if let Some(window) = self.active {
            let id = protocol.play(&window)?;
            self.active_id = Some(id);
            return Ok(Some(id));
        }

        if self.log_opened {
            protocol.metadata()?;
        } else {
            let duration = self.params.duration.unwrap_or(self.params.buffer_length);
            protocol.open(duration, self.params.timestamp)?;
            self.log_opened = true;
        }
        Ok(None)
    }

    /// False for timeslices answering a request that is no longer active
    pub fn accepts(&self, timeslice: &Timeslice) -> bool {
        match (timeslice.request_id, self.active_id) {
            (Some(received), Some(active)) => received == active,
            _ => true,
        }
    }

    /// Record that data up to `timestamp` arrived for the active request
    pub fn record(&mut self, timestamp: f64) {
        if let Some(active) = self.active {
            self.held = range::add(SimpleRange::new(active.start_timestamp, timestamp), &self.held);
        }
    }
}
