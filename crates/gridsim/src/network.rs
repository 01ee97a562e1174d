//! Transfer delays between grid entities.

use serde::{Deserialize, Serialize};

/// Constant-latency network, transfer time also depends on the baud rate of the sending side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkModel {
    /// One-way latency in seconds added to every message.
    pub latency: f64,
}

impl NetworkModel {
    pub fn new(latency: f64) -> Self {
        Self { latency }
    }

    /// Time to deliver `size` bytes over a link with the given baud rate (bytes per second).
    ///
    /// A zero baud rate disables the size-dependent part.
    pub fn delay(&self, size: u64, baud_rate: f64) -> f64 {
        if baud_rate > 0. {
            self.latency + size as f64 / baud_rate
        } else {
            self.latency
        }
    }
}
