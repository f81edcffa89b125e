//! Single monotonic clock all host timestamps derive from.
//! `now_ms()` backs the capture-window deadlines; bus round-trip
//! timestamps (`t_request`/`t_response`) come straight from
//! `tokio::time::Instant` in `bus.rs` and don't need this offset.

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock { start: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
