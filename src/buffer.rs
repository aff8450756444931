// Time-indexed timeslice buffer
//
// The loader does not own how timeslices are stored; it talks to a
// `TimesliceStore`. `TimesliceBuffer` is the in-memory implementation: a
// timestamp-sorted list with three windowing modes
// - Unlimited: keep everything
// - Fixed: keep [start, end], set by the window scheduler on every new request
// - Relative: keep [now + start_offset, now + end_offset] around the playhead,
//   used when following a live log

use crate::range::SimpleRange;
use crate::types::{Frame, Timeslice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage collaborator the loader inserts into and queries frames from
pub trait TimesliceStore: Send {
    /// Insert a timeslice. Returns true when the buffer changed.
    fn insert(&mut self, timeslice: Arc<Timeslice>) -> bool;

    /// Move the playhead; relative windows prune around it.
    /// Returns true when the buffer changed.
    fn set_current_time(&mut self, timestamp: f64) -> bool;

    /// Span between the oldest and newest stored timeslice
    fn loaded_time_range(&self) -> Option<SimpleRange>;

    /// Switch to a fixed window and drop everything outside it.
    /// Returns true when the buffer changed.
    fn update_fixed_buffer(&mut self, start: f64, end: f64) -> bool;

    /// Switch to a window relative to the playhead
    fn set_relative_window(&mut self, start_offset: f64, end_offset: f64);

    /// Latest value of every stream at `timestamp + look_ahead`
    fn current_frame(&self, timestamp: f64, look_ahead: f64) -> Option<Frame>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_stats(&self) -> BufferStats;
}

/// Windowing mode of a [`TimesliceBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BufferWindow {
    Unlimited,
    Fixed { start: f64, end: f64 },
    Relative { start_offset: f64, end_offset: f64 },
}

/// Statistics about the buffer contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStats {
    pub timeslices_stored: usize,
    pub oldest_timestamp: Option<f64>,
    pub newest_timestamp: Option<f64>,
    pub window: BufferWindow,
    pub version: u64,
}

/// In-memory, timestamp-ordered timeslice store
pub struct TimesliceBuffer {
    slices: Vec<Arc<Timeslice>>,
    window: BufferWindow,
    current_time: Option<f64>,
    version: u64,
}

impl Default for TimesliceBuffer {
    fn default() -> Self {
        Self::new(BufferWindow::Unlimited)
    }
}

impl TimesliceBuffer {
    pub fn new(window: BufferWindow) -> Self {
        Self {
            slices: Vec::new(),
            window,
            current_time: None,
            version: 0,
        }
    }

    pub fn relative(start_offset: f64, end_offset: f64) -> Self {
        Self::new(BufferWindow::Relative {
            start_offset,
            end_offset,
        })
    }

    pub fn window(&self) -> BufferWindow {
        self.window
    }

    pub fn timeslices(&self) -> &[Arc<Timeslice>] {
        &self.slices
    }

    /// Whether a timeslice at `timestamp` may be stored under the current window
    fn accepts(&self, timestamp: f64) -> bool {
        match self.window {
            BufferWindow::Unlimited => true,
            BufferWindow::Fixed { start, end } => start <= timestamp && timestamp <= end,
            // Newer data is always welcome when following the tip; it becomes
            // the playhead right after insertion.
            BufferWindow::Relative { start_offset, .. } => match self.current_time {
                Some(now) => timestamp >= now + start_offset,
                None => true,
            },
        }
    }

    /// Keep only timeslices within [start, end]
    fn retain_span(&mut self, start: f64, end: f64) -> bool {
        let before = self.slices.len();
        self.slices
            .retain(|slice| start <= slice.timestamp && slice.timestamp <= end);
        let changed = self.slices.len() != before;
        if changed {
            self.version += 1;
        }
        changed
    }
}

impl TimesliceStore for TimesliceBuffer {
    fn insert(&mut self, timeslice: Arc<Timeslice>) -> bool {
        let timestamp = timeslice.timestamp;
        if !timestamp.is_finite() || !self.accepts(timestamp) {
            return false;
        }

        let index = self.slices.partition_point(|s| s.timestamp < timestamp);
        match self.slices.get(index) {
            Some(existing) if existing.timestamp == timestamp => {
                if Arc::ptr_eq(existing, &timeslice) {
                    return false;
                }
                self.slices[index] = timeslice;
            }
            _ => self.slices.insert(index, timeslice),
        }

        self.version += 1;
        true
    }

    fn set_current_time(&mut self, timestamp: f64) -> bool {
        self.current_time = Some(timestamp);
        match self.window {
            BufferWindow::Relative {
                start_offset,
                end_offset,
            } => self.retain_span(timestamp + start_offset, timestamp + end_offset),
            _ => false,
        }
    }

    fn loaded_time_range(&self) -> Option<SimpleRange> {
        match (self.slices.first(), self.slices.last()) {
            (Some(first), Some(last)) => Some(SimpleRange::new(first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    fn update_fixed_buffer(&mut self, start: f64, end: f64) -> bool {
        self.window = BufferWindow::Fixed { start, end };
        self.retain_span(start, end)
    }

    fn set_relative_window(&mut self, start_offset: f64, end_offset: f64) {
        self.window = BufferWindow::Relative {
            start_offset,
            end_offset,
        };
    }

    fn current_frame(&self, timestamp: f64, look_ahead: f64) -> Option<Frame> {
        let cutoff = timestamp + look_ahead;
        let visible = self.slices.partition_point(|s| s.timestamp <= cutoff);
        if visible == 0 {
            return None;
        }

        // Later timeslices overwrite earlier values of the same stream
        let mut frame = Frame {
            timestamp,
            look_ahead,
            streams: Default::default(),
        };
        for slice in &self.slices[..visible] {
            for (name, value) in &slice.streams {
                frame.streams.insert(name.clone(), value.clone());
            }
        }
        Some(frame)
    }

    fn len(&self) -> usize {
        self.slices.len()
    }

    fn get_stats(&self) -> BufferStats {
        BufferStats {
            timeslices_stored: self.slices.len(),
            oldest_timestamp: self.slices.first().map(|s| s.timestamp),
            newest_timestamp: self.slices.last().map(|s| s.timestamp),
            window: self.window,
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slice(timestamp: f64, stream: &str, value: i64) -> Arc<Timeslice> {
        Arc::new(Timeslice {
            timestamp,
            request_id: None,
            streams: [(stream.to_string(), json!(value))].into_iter().collect(),
        })
    }

    #[test]
    fn test_insert_keeps_order_and_replaces_duplicates() {
        let mut buffer = TimesliceBuffer::default();
        assert!(buffer.insert(slice(2.0, "/a", 2)));
        assert!(buffer.insert(slice(1.0, "/a", 1)));
        assert!(buffer.insert(slice(3.0, "/a", 3)));
        assert!(buffer.insert(slice(2.0, "/a", 20)));

        let timestamps: Vec<f64> = buffer.timeslices().iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0]);
        assert_eq!(buffer.timeslices()[1].streams["/a"], json!(20));
        assert_eq!(buffer.loaded_time_range(), Some(SimpleRange::new(1.0, 3.0)));

        let same = buffer.timeslices()[0].clone();
        assert!(!buffer.insert(same));
    }

    #[test]
    fn test_fixed_window_prunes_and_rejects() {
        let mut buffer = TimesliceBuffer::default();
        for t in 0..10 {
            buffer.insert(slice(t as f64, "/a", t));
        }

        assert!(buffer.update_fixed_buffer(3.0, 6.0));
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.update_fixed_buffer(3.0, 6.0));
        assert!(!buffer.insert(slice(8.0, "/a", 8)));
        assert!(buffer.insert(slice(4.5, "/a", 45)));
    }

    #[test]
    fn test_relative_window_follows_playhead() {
        let mut buffer = TimesliceBuffer::relative(-20.0, 10.0);
        for t in 0..50 {
            buffer.insert(slice(t as f64, "/a", t));
            buffer.set_current_time(t as f64);
        }

        let stats = buffer.get_stats();
        assert_eq!(stats.oldest_timestamp, Some(29.0));
        assert_eq!(stats.newest_timestamp, Some(49.0));

        // Too old for the window
        assert!(!buffer.insert(slice(10.0, "/a", 10)));
        // Far ahead of the playhead is still accepted
        assert!(buffer.insert(slice(80.0, "/a", 80)));
    }

    #[test]
    fn test_current_frame_takes_latest_per_stream() {
        let mut buffer = TimesliceBuffer::default();
        buffer.insert(slice(1.0, "/a", 1));
        buffer.insert(slice(2.0, "/b", 2));
        buffer.insert(slice(3.0, "/a", 3));
        buffer.insert(slice(5.0, "/a", 5));

        assert!(buffer.current_frame(0.5, 0.0).is_none());

        let frame = buffer.current_frame(3.0, 0.0).unwrap();
        assert_eq!(frame.streams["/a"], json!(3));
        assert_eq!(frame.streams["/b"], json!(2));

        let ahead = buffer.current_frame(3.0, 2.0).unwrap();
        assert_eq!(ahead.streams["/a"], json!(5));
    }
}
