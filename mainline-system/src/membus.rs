// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The memory-bus model.
//!
//! Collective algorithms charge reads and writes against the bus; the cost
//! comes back as cycles of delay added to the next message. A shared bus
//! carries reads and writes over the same wires at half the effective
//! bandwidth.

use mainline_engine::types::{Bytes, Cycles};

/// Cycles-per-byte memory model.
pub struct MemBus {
    bytes_per_cycle: f64,
    shared: bool,

    /// Total bytes read, for the stats report.
    pub bytes_read: Bytes,
    /// Total bytes written, for the stats report.
    pub bytes_written: Bytes,
}

impl MemBus {
    /// A bus moving `bytes_per_cycle` in each direction, or shared between
    /// them.
    #[must_use]
    pub fn new(bytes_per_cycle: f64, shared: bool) -> Self {
        Self {
            bytes_per_cycle,
            shared,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    fn cycles(&self, bytes: Bytes) -> Cycles {
        let factor = if self.shared { 2.0 } else { 1.0 };
        (bytes as f64 * factor / self.bytes_per_cycle).ceil() as Cycles
    }

    /// Charge a read of `bytes`, returning its cost.
    pub fn read(&mut self, bytes: Bytes) -> Cycles {
        self.bytes_read += bytes;
        self.cycles(bytes)
    }

    /// Charge a write of `bytes`, returning its cost.
    pub fn write(&mut self, bytes: Bytes) -> Cycles {
        self.bytes_written += bytes;
        self.cycles(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_scale_with_bandwidth() {
        let mut bus = MemBus::new(128.0, false);
        assert_eq!(bus.read(1280), 10);
        assert_eq!(bus.write(1), 1);
        assert_eq!(bus.bytes_read, 1280);
        assert_eq!(bus.bytes_written, 1);
    }

    #[test]
    fn shared_bus_doubles_cost() {
        let mut dedicated = MemBus::new(128.0, false);
        let mut shared = MemBus::new(128.0, true);
        assert_eq!(shared.read(1280), 2 * dedicated.read(1280));
    }
}
