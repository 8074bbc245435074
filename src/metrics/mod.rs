//! Metrics for the slot router.
//!
//! Plain atomic counters and gauges; exporting them is left to the embedding
//! proxy, which can read a [`RouterMetricsSnapshot`] at any time.
//!
//! ```text
//! RouterMetrics
//! ├── counters
//! │   ├── dispatched, replica_reads, migrated_keys, addr_dispatched
//! │   ├── slot_fills, master_switches, keepalive_failures
//! │   └── rejected{kind}
//! └── gauges
//!     └── primary_connections, replica_connections
//! ```

mod counters;
mod gauges;

pub use counters::{Counter, LabeledCounter};
pub use gauges::Gauge;

use crate::error::Error;

/// Name and help text of a metric, for whoever exports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Desc {
    pub name: &'static str,
    pub help: &'static str,
}

/// Counters and gauges maintained by a [`Router`](crate::Router).
#[derive(Debug)]
pub struct RouterMetrics {
    /// Requests handed to a backend connection.
    pub dispatched: Counter,
    /// Requests sent to a replica.
    pub replica_reads: Counter,
    /// Requests whose keys were migrated before forwarding.
    pub migrated_keys: Counter,
    /// Requests sent by direct address.
    pub addr_dispatched: Counter,
    /// Slot reconfigurations.
    pub slot_fills: Counter,
    /// Slots refilled by a master switch.
    pub master_switches: Counter,
    /// Keepalive probes that failed.
    pub keepalive_failures: Counter,
    /// Requests rejected, by error kind.
    pub rejected: LabeledCounter<1>,
    /// Addresses in the primary pool.
    pub primary_connections: Gauge,
    /// Addresses in the replica pool.
    pub replica_connections: Gauge,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self {
            dispatched: Counter::new("router_dispatched_total", "Requests handed to a backend"),
            replica_reads: Counter::new("router_replica_reads_total", "Requests sent to replicas"),
            migrated_keys: Counter::new(
                "router_migrated_keys_total",
                "Keys migrated before forwarding",
            ),
            addr_dispatched: Counter::new(
                "router_addr_dispatched_total",
                "Requests sent by direct address",
            ),
            slot_fills: Counter::new("router_slot_fills_total", "Slot reconfigurations"),
            master_switches: Counter::new(
                "router_master_switches_total",
                "Slots refilled by a master switch",
            ),
            keepalive_failures: Counter::new(
                "router_keepalive_failures_total",
                "Failed keepalive probes",
            ),
            rejected: LabeledCounter::new(
                "router_rejected_total",
                "Requests rejected by kind",
                ["kind"],
            ),
            primary_connections: Gauge::new(
                "router_primary_connections",
                "Addresses in the primary pool",
            ),
            replica_connections: Gauge::new(
                "router_replica_connections",
                "Addresses in the replica pool",
            ),
        }
    }

    /// Count a rejected request under its error kind.
    pub fn record_rejection(&self, error: &Error) {
        self.rejected.inc([error_kind(error)]);
    }

    /// Take a point-in-time copy of every value.
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            dispatched: self.dispatched.get(),
            replica_reads: self.replica_reads.get(),
            migrated_keys: self.migrated_keys.get(),
            addr_dispatched: self.addr_dispatched.get(),
            slot_fills: self.slot_fills.get(),
            master_switches: self.master_switches.get(),
            keepalive_failures: self.keepalive_failures.get(),
            rejected: self
                .rejected
                .get_all()
                .into_iter()
                .map(|([kind], n)| (kind, n))
                .collect(),
            primary_connections: self.primary_connections.get(),
            replica_connections: self.replica_connections.get(),
        }
    }
}

/// Stable label for an error kind.
pub fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::ClosedRouter => "closed",
        Error::InvalidSlotId(_) => "invalid_slot",
        Error::SlotNotReady(_) => "not_ready",
        Error::CrossSlot { .. } => "cross_slot",
        Error::DestinationUnavailable(_) => "destination_unavailable",
        Error::MigrationFailed { .. } => "migration_failed",
        Error::InvalidDescriptor(_) => "invalid_descriptor",
        Error::Config(_) => "config",
        Error::Backend(_) => "backend",
    }
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterMetricsSnapshot {
    pub dispatched: u64,
    pub replica_reads: u64,
    pub migrated_keys: u64,
    pub addr_dispatched: u64,
    pub slot_fills: u64,
    pub master_switches: u64,
    pub keepalive_failures: u64,
    /// `(kind, count)` pairs sorted by kind.
    pub rejected: Vec<(String, u64)>,
    pub primary_connections: i64,
    pub replica_connections: i64,
}

impl RouterMetricsSnapshot {
    /// Rejections recorded for `kind`.
    pub fn rejected(&self, kind: &str) -> u64 {
        self.rejected
            .iter()
            .find(|(k, _)| k == kind)
            .map_or(0, |(_, n)| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = RouterMetrics::new();
        metrics.dispatched.inc();
        metrics.dispatched.inc();
        metrics.record_rejection(&Error::SlotNotReady(3));
        metrics.record_rejection(&Error::ClosedRouter);
        metrics.record_rejection(&Error::SlotNotReady(4));
        metrics.primary_connections.set(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.dispatched, 2);
        assert_eq!(snap.rejected("not_ready"), 2);
        assert_eq!(snap.rejected("closed"), 1);
        assert_eq!(snap.rejected("cross_slot"), 0);
        assert_eq!(snap.primary_connections, 2);
    }
}
