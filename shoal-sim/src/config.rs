//! Tunables of the simulated engine.

use std::time::Duration;

/// Behaviour of simulated transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Time between adding a descriptor and metadata becoming available
    pub metadata_delay: Duration,
    /// Simulated download rate per transfer in bytes per second
    pub download_speed_bps: u64,
    /// Piece size used to split content
    pub piece_length: u64,
    /// Period of the download loop
    pub tick_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            metadata_delay: Duration::from_millis(500),
            download_speed_bps: 4 * 1024 * 1024,
            piece_length: 256 * 1024,
            tick_interval: Duration::from_millis(50),
        }
    }
}

impl SimulationConfig {
    /// Bytes that may be completed during one tick.
    pub fn bytes_per_tick(&self) -> u64 {
        let per_tick = self.download_speed_bps as f64 * self.tick_interval.as_secs_f64();
        (per_tick as u64).max(1)
    }

    /// Fast settings for tests: instant metadata, one piece per millisecond tick.
    pub fn instant() -> Self {
        Self {
            metadata_delay: Duration::ZERO,
            download_speed_bps: 64 * 1024 * 1000,
            piece_length: 16 * 1024,
            tick_interval: Duration::from_millis(1),
        }
    }
}
