//! Slot table and request dispatch.
//!
//! # Locking Strategy
//!
//! Two independent levels:
//!
//! ## Router lock (`parking_lot::RwLock`)
//! - Read side: `dispatch`, `dispatch_slot`, `dispatch_addr`, snapshots,
//!   `keep_alive`. These run fully in parallel.
//! - Write side: `fill_slot`, `switch_masters`, `start`, `close`. Structural
//!   changes are serialized against each other and against dispatch.
//!
//! ## Slot gate
//! Each [`Slot`] has its own admission gate. Reconfiguration holds it while
//! swapping connections, and a descriptor with `locked = true` leaves it held
//! until the next fill. Admission only takes the slot's gate mutex, never the
//! router write lock, so draining in-flight routing cannot deadlock.
//!
//! # Dispatch
//!
//! ```text
//! Request ──▶ hash::resolve_slot ──▶ Slot::forward ──┬──▶ migrate_key(source)
//!                                                    ├──▶ backend.push_back
//!                                                    └──▶ replica.push_back
//! ```

pub mod hash;
mod keepalive;
pub mod slot;

pub use slot::{Forwarded, Role, Slot, SlotStatus};

use crate::backend::{Connector, SharedConnPool};
use crate::config::{BackendRole, RouterConfig};
use crate::error::{Error, Result};
use crate::metrics::RouterMetrics;
use crate::request::Request;
use crate::types::{GroupId, SlotDescriptor, SlotId, MAX_SLOT_NUM};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Lifecycle {
    online: bool,
    closed: bool,
}

/// Routes requests over a fixed table of [`MAX_SLOT_NUM`] slots.
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    lifecycle: RwLock<Lifecycle>,
    slots: Box<[Slot]>,
    primary: SharedConnPool,
    replica: SharedConnPool,
    metrics: RouterMetrics,
}

impl Router {
    /// Create an empty router. Every slot starts unassigned.
    pub fn new(config: RouterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let slots = (0..MAX_SLOT_NUM as SlotId).map(Slot::new).collect();
        Ok(Self {
            primary: SharedConnPool::new(BackendRole::Primary, connector.clone()),
            replica: SharedConnPool::new(BackendRole::Replica, connector),
            config,
            lifecycle: RwLock::new(Lifecycle::default()),
            slots,
            metrics: RouterMetrics::new(),
        })
    }

    /// Mark the router online. No-op once closed.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.closed {
            return;
        }
        lifecycle.online = true;
        tracing::info!("Router online");
    }

    /// Drain every slot, releasing all connections, and refuse further work.
    pub fn close(&self) {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.closed {
            return;
        }
        lifecycle.closed = true;
        for slot in self.slots.iter() {
            self.fill(slot, &SlotDescriptor::empty(slot.id()), false);
        }
        self.update_pool_gauges();
        tracing::info!("Router closed");
    }

    /// Online and not closed.
    pub fn is_online(&self) -> bool {
        let lifecycle = self.lifecycle.read();
        lifecycle.online && !lifecycle.closed
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.read().closed
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Router metrics.
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Pool backing slot backends and migration sources.
    pub fn primary_pool(&self) -> &SharedConnPool {
        &self.primary
    }

    /// Pool backing replica groups.
    pub fn replica_pool(&self) -> &SharedConnPool {
        &self.replica
    }

    /// Snapshot of every slot, replicas included.
    pub fn slots(&self) -> Vec<SlotDescriptor> {
        let _lifecycle = self.lifecycle.read();
        self.slots.iter().map(|s| s.snapshot(true)).collect()
    }

    /// Snapshot of one slot, or `None` for an out-of-range id.
    pub fn slot(&self, id: SlotId) -> Option<SlotDescriptor> {
        let _lifecycle = self.lifecycle.read();
        self.slots.get(id as usize).map(|s| s.snapshot(true))
    }

    /// Routing state of one slot, or `None` for an out-of-range id.
    pub fn slot_status(&self, id: SlotId) -> Option<SlotStatus> {
        let _lifecycle = self.lifecycle.read();
        self.slots.get(id as usize).map(Slot::status)
    }

    /// Every group currently referenced as a backend or migration source.
    pub fn group_ids(&self) -> BTreeSet<GroupId> {
        let _lifecycle = self.lifecycle.read();
        self.slots
            .iter()
            .flat_map(|s| {
                let (backend, migrate) = s.group_ids();
                [backend, migrate]
            })
            .filter(|&gid| gid != 0)
            .collect()
    }

    /// Whether any slot's backend was installed by a master switch.
    pub fn has_switched(&self) -> bool {
        let _lifecycle = self.lifecycle.read();
        self.slots.iter().any(Slot::is_switched)
    }

    /// Apply a slot descriptor from the metadata layer.
    ///
    /// Validation happens before the slot is touched; a rejected descriptor
    /// leaves the previous configuration in place.
    pub fn fill_slot(&self, desc: &SlotDescriptor) -> Result<()> {
        let lifecycle = self.lifecycle.write();
        if lifecycle.closed {
            return Err(Error::ClosedRouter);
        }
        let slot = self.get_slot(desc.id)?;
        desc.validate().map_err(Error::InvalidDescriptor)?;

        self.fill(slot, desc, true);
        self.update_pool_gauges();
        Ok(())
    }

    /// Re-point slots whose backend or migration source group has a new
    /// master. Slots already pointing at the given masters are left alone, so
    /// repeating the same mapping is a no-op.
    pub fn switch_masters(&self, masters: &HashMap<GroupId, String>) -> Result<()> {
        let lifecycle = self.lifecycle.write();
        if lifecycle.closed {
            return Err(Error::ClosedRouter);
        }
        for slot in self.slots.iter() {
            self.try_switch_master(slot, masters);
        }
        self.update_pool_gauges();
        Ok(())
    }

    fn try_switch_master(&self, slot: &Slot, masters: &HashMap<GroupId, String>) {
        let mut desc = slot.snapshot(true);
        let mut update = false;

        for endpoint in desc.backend.iter_mut().chain(desc.migrate_from.iter_mut()) {
            if endpoint.group_id == 0 {
                continue;
            }
            if let Some(addr) = masters.get(&endpoint.group_id) {
                if !addr.is_empty() && *addr != endpoint.addr {
                    endpoint.addr = addr.clone();
                    update = true;
                }
            }
        }
        if !update {
            return;
        }

        tracing::warn!(slot = slot.id(), "Slot switch-master");
        desc.switched = true;
        self.fill(slot, &desc, true);
        self.metrics.master_switches.inc();
    }

    /// Reconfigure one slot. Caller holds the router write lock.
    fn fill(&self, slot: &Slot, desc: &SlotDescriptor, log: bool) {
        slot.reconfigure(desc, &self.primary, &self.replica, &self.config);
        self.metrics.slot_fills.inc();
        if log {
            tracing::warn!(
                slot = slot.id(),
                backend = desc.backend_addr().unwrap_or(""),
                migrate_from = desc.migrate_addr().unwrap_or(""),
                replica_groups = desc.replica_groups.len(),
                locked = slot.is_locked(),
                "Fill slot"
            );
        }
    }

    fn get_slot(&self, id: SlotId) -> Result<&Slot> {
        self.slots.get(id as usize).ok_or(Error::InvalidSlotId(id))
    }

    fn update_pool_gauges(&self) {
        self.metrics.primary_connections.set(self.primary.len() as i64);
        self.metrics.replica_connections.set(self.replica.len() as i64);
    }

    /// Probe every pooled connection in both pools.
    pub fn keep_alive(&self) -> Result<()> {
        let lifecycle = self.lifecycle.read();
        if lifecycle.closed {
            return Err(Error::ClosedRouter);
        }
        let failures = self.primary.keep_alive_all() + self.replica.keep_alive_all();
        self.metrics.keepalive_failures.inc_by(failures as u64);
        Ok(())
    }

    /// Route a request by its keys.
    pub fn dispatch(&self, request: &Arc<Request>) -> Result<Forwarded> {
        let result = self.dispatch_inner(request);
        self.record(&result);
        result
    }

    fn dispatch_inner(&self, request: &Arc<Request>) -> Result<Forwarded> {
        let lifecycle = self.lifecycle.read();
        if lifecycle.closed {
            return Err(Error::ClosedRouter);
        }
        let (id, hash_keys) = hash::resolve_slot(request.routing_keys())?;
        let slot = self.get_slot(id)?;
        slot.forward(request, &hash_keys, self.config.replica_reads)
    }

    /// Send a request to a specific slot, skipping key hashing and the
    /// migration check. Intended for infrastructure commands.
    pub fn dispatch_slot(&self, request: &Arc<Request>, id: SlotId) -> Result<Forwarded> {
        let result = self.dispatch_slot_inner(request, id);
        self.record(&result);
        result
    }

    fn dispatch_slot_inner(&self, request: &Arc<Request>, id: SlotId) -> Result<Forwarded> {
        let lifecycle = self.lifecycle.read();
        if lifecycle.closed {
            return Err(Error::ClosedRouter);
        }
        let slot = self.get_slot(id)?;
        slot.forward(request, &[], false)
    }

    /// Send a request straight to a pooled connection for `addr`, trying the
    /// primary pool first. Returns the role of the pool that took it.
    pub fn dispatch_addr(&self, request: &Arc<Request>, addr: &str) -> Result<BackendRole> {
        let lifecycle = self.lifecycle.read();
        if lifecycle.closed {
            let err = Error::ClosedRouter;
            self.metrics.record_rejection(&err);
            return Err(err);
        }

        let seed = request.selection_seed();
        for pool in [&self.primary, &self.replica] {
            let conn = pool
                .get(addr)
                .and_then(|shared| shared.backend_conn(seed, false).cloned());
            if let Some(conn) = conn {
                request.set_destination(conn.addr());
                conn.push_back(request.clone());
                self.metrics.addr_dispatched.inc();
                return Ok(pool.role());
            }
        }

        let err = Error::DestinationUnavailable(addr.to_string());
        self.metrics.record_rejection(&err);
        Err(err)
    }

    fn record(&self, result: &Result<Forwarded>) {
        match result {
            Ok(fwd) => {
                self.metrics.dispatched.inc();
                if fwd.migrated {
                    self.metrics.migrated_keys.inc();
                }
                if matches!(fwd.role, Role::Replica { .. }) {
                    self.metrics.replica_reads.inc();
                }
            }
            Err(e) => self.metrics.record_rejection(e),
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.close();
    }
}
