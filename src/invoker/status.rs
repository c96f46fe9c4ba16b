//! Aggregated resilience status.

use serde::Serialize;

use crate::admission::AdmissionStats;
use crate::config::schema::FallbackTier;
use crate::resilience::CircuitStats;

/// Snapshot of every layer, as served by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStatus {
    pub bottleneck: AdmissionStats,
    pub circuit_breakers: Vec<CircuitStats>,
    pub open_circuits: Vec<String>,
    pub fallback_enabled: bool,
    pub fallback_tiers: Vec<FallbackTier>,
}

impl ResilienceStatus {
    /// True when nothing is rejecting traffic.
    pub fn is_healthy(&self) -> bool {
        self.open_circuits.is_empty() && self.bottleneck.queued < self.bottleneck.max_queue.max(1)
    }
}
