//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use riptide_wire::MINIMUM_MTU;

/// Tuning knobs for one reliability session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Largest datagram the path is trusted to carry
    pub mtu: u16,
    /// Recovery-queue size the compaction pass drives toward
    pub max_recovery_entries: usize,
    /// Fragment groups allowed to reassemble concurrently
    pub max_open_fragment_groups: usize,
    /// Fragments one group may declare
    pub max_fragment_count: u16,
    /// Age after which an incomplete fragment group is reaped
    pub fragment_group_ttl: Duration,
    /// Idle time after which the peer is considered gone
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mtu: 1492,
            max_recovery_entries: 512,
            max_open_fragment_groups: 4,
            max_fragment_count: 128,
            fragment_group_ttl: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Copy of this config with the MTU clamped to a negotiated value
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu.max(MINIMUM_MTU);
        self
    }
}
