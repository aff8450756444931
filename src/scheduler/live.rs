// Live-tail scheduling
//
// A live log has no fixed end. The buffer keeps two thirds of `buffer_length`
// behind the playhead and one third ahead of it, and the playhead jumps to
// every timeslice as it arrives.

/// Relative buffer offsets for a live log: (history, lookahead)
pub fn buffer_offsets(buffer_length: f64) -> (f64, f64) {
    let third = buffer_length / 3.0;
    (-2.0 * third, third)
}

#[derive(Debug, Clone)]
pub struct LiveTailScheduler {
    buffer_length: f64,
    tip: Option<f64>,
}

impl LiveTailScheduler {
    pub fn new(buffer_length: f64) -> Self {
        Self {
            buffer_length,
            tip: None,
        }
    }

    pub fn offsets(&self) -> (f64, f64) {
        buffer_offsets(self.buffer_length)
    }

    /// Once data flows the playhead belongs to the stream, not the host
    pub fn follows_tip(&self) -> bool {
        self.tip.is_some()
    }

    pub fn follow(&mut self, timestamp: f64) {
        self.tip = Some(timestamp);
    }
}
