//! Control port allocation
//!
//! One cursor over an inclusive range, advanced on every call. Ports still
//! bound by an old worker are not detected; the range is expected to be much
//! larger than the worker limit.

use std::ops::RangeInclusive;

#[derive(Debug, Clone)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    cursor: u16,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        let max = max.max(min);
        // Starts at the top so the first allocation wraps to `min`.
        Self {
            min,
            max,
            cursor: max,
        }
    }

    /// Advance the cursor, wrapping past `max`, and return the new port
    pub fn next_port(&mut self) -> u16 {
        self.cursor = if self.cursor >= self.max {
            self.min
        } else {
            self.cursor + 1
        };
        self.cursor
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.min..=self.max
    }
}
