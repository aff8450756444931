// Window scheduling policies
//
// A loader runs exactly one schedule:
// - Stream: seekable log over a socket, bounded window around the playhead
// - Live: unbounded log over a socket, playhead follows the newest data
// - File: static chunks pulled over HTTP

pub mod chunked;
pub mod live;
pub mod window;

pub use chunked::{ChunkSource, ChunkedFileScheduler, HttpChunkSource};
pub use live::LiveTailScheduler;
pub use window::{compute_next_request_window, WindowScheduler};

use crate::buffer::TimesliceStore;
use crate::range::{self, ComplexRange, SimpleRange};
use crate::types::LogMetadata;

pub enum Schedule {
    Stream(WindowScheduler),
    Live(LiveTailScheduler),
    File(ChunkedFileScheduler),
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Stream(_) => "stream",
            Schedule::Live(_) => "live",
            Schedule::File(_) => "file",
        }
    }

    /// Whether this schedule talks to a socket
    pub fn uses_socket(&self) -> bool {
        !matches!(self, Schedule::File(_))
    }

    /// Apply the schedule's windowing mode to a fresh buffer
    pub fn configure_buffer(&self, buffer: &mut dyn TimesliceStore) {
        if let Schedule::Live(live) = self {
            let (start_offset, end_offset) = live.offsets();
            buffer.set_relative_window(start_offset, end_offset);
        }
    }

    /// Time ranges considered loaded
    pub fn buffer_range(&self, buffer: &dyn TimesliceStore) -> ComplexRange {
        match self {
            Schedule::Stream(window) => window.held().clone(),
            Schedule::Live(_) | Schedule::File(_) => match buffer.loaded_time_range() {
                Some(loaded) => range::add(loaded, &range::empty()),
                None => range::empty(),
            },
        }
    }

    /// Bounds of the window the schedule is trying to keep buffered
    pub fn buffer_bounds(
        &self,
        buffer: &dyn TimesliceStore,
        metadata: Option<&LogMetadata>,
    ) -> Option<SimpleRange> {
        match self {
            Schedule::Stream(window) => window
                .active_request()
                .map(|active| SimpleRange::new(active.buffer_start, active.buffer_end)),
            Schedule::Live(_) => buffer.loaded_time_range(),
            Schedule::File(chunked) => match chunked.chunk_start() {
                Some(start) => Some(SimpleRange::new(start, start + chunked.duration())),
                None => metadata.map(|m| SimpleRange::new(m.start_or_min(), m.end_or_max())),
            },
        }
    }
}
