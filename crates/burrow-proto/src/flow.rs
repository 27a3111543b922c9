//! Traffic accounting shared between hosts, clients and sessions
//!
//! A `Flow` is referenced through an `Arc` by every party that touches it.
//! Sessions add export bytes on a Host's flow, the bridge side adds inlet
//! bytes, and the registry writes a Client's usage when syncing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes in one megabyte, the unit flow limits are configured in
const MB: u64 = 1 << 20;

/// Cumulative traffic counters with an optional quota
#[derive(Debug, Default)]
pub struct Flow {
    /// Bytes sent from the edge towards the tunnel
    export_flow: AtomicU64,
    /// Bytes received from the tunnel back to the edge
    inlet_flow: AtomicU64,
    /// Quota in MB, 0 means unlimited
    flow_limit: AtomicU64,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flow with a quota expressed in MB
    pub fn with_limit(limit_mb: u64) -> Self {
        Self {
            flow_limit: AtomicU64::new(limit_mb),
            ..Self::default()
        }
    }

    /// Add traffic to both directions
    #[inline]
    pub fn add(&self, export: u64, inlet: u64) {
        if export > 0 {
            self.export_flow.fetch_add(export, Ordering::Relaxed);
        }
        if inlet > 0 {
            self.inlet_flow.fetch_add(inlet, Ordering::Relaxed);
        }
    }

    pub fn export_flow(&self) -> u64 {
        self.export_flow.load(Ordering::Relaxed)
    }

    pub fn inlet_flow(&self) -> u64 {
        self.inlet_flow.load(Ordering::Relaxed)
    }

    /// Total bytes in both directions
    pub fn total(&self) -> u64 {
        self.export_flow().saturating_add(self.inlet_flow())
    }

    pub fn limit_mb(&self) -> u64 {
        self.flow_limit.load(Ordering::Relaxed)
    }

    pub fn set_limit_mb(&self, limit_mb: u64) {
        self.flow_limit.store(limit_mb, Ordering::Relaxed);
    }

    /// Overwrite both counters, used when folding host counters into a client
    pub fn store(&self, export: u64, inlet: u64) {
        self.export_flow.store(export, Ordering::Relaxed);
        self.inlet_flow.store(inlet, Ordering::Relaxed);
    }

    /// Check whether a positive quota has been used up
    pub fn is_exhausted(&self) -> bool {
        let limit = self.limit_mb();
        limit > 0 && self.total() >= limit.saturating_mul(MB)
    }

    /// Reset usage and return the previous (export, inlet) values
    pub fn reset(&self) -> (u64, u64) {
        let export = self.export_flow.swap(0, Ordering::Relaxed);
        let inlet = self.inlet_flow.swap(0, Ordering::Relaxed);
        (export, inlet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unlimited_flow_never_exhausted() {
        let flow = Flow::new();
        flow.add(u64::MAX / 2, 0);
        assert!(!flow.is_exhausted());
    }

    #[test]
    fn test_limit_is_inclusive() {
        let flow = Flow::with_limit(10);
        flow.add(10 * MB - 1, 0);
        assert!(!flow.is_exhausted());

        flow.add(0, 1);
        assert_eq!(flow.total(), 10 * MB);
        assert!(flow.is_exhausted());
    }

    #[test]
    fn test_reset_restores_service() {
        let flow = Flow::with_limit(1);
        flow.add(MB, MB);
        assert!(flow.is_exhausted());

        assert_eq!(flow.reset(), (MB, MB));
        assert!(!flow.is_exhausted());
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let flow = Arc::new(Flow::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let flow = flow.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    flow.add(3, 1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(flow.export_flow(), 16 * 1000 * 3);
        assert_eq!(flow.inlet_flow(), 16 * 1000);
    }
}
