//! Core types shared between the router and the metadata layer.

use serde::{Deserialize, Serialize};

/// Number of slots in the table. Fixed at compile time.
pub const MAX_SLOT_NUM: usize = 1024;

/// Slot identifier, `0..MAX_SLOT_NUM`.
pub type SlotId = u32;

/// Replication group identifier. `0` means "no group".
pub type GroupId = u32;

/// A backend address together with the group that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Backend address, e.g. `10.0.0.3:6379`.
    pub addr: String,
    /// Owning group, used for master-switch change detection.
    pub group_id: GroupId,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(addr: impl Into<String>, group_id: GroupId) -> Self {
        Self {
            addr: addr.into(),
            group_id,
        }
    }
}

/// External view of one slot's routing configuration.
///
/// The metadata layer hands these to [`Router::fill_slot`](crate::Router::fill_slot);
/// the router hands them back from its snapshot accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    /// Slot id.
    pub id: SlotId,

    /// Live backend for normal traffic.
    pub backend: Option<Endpoint>,

    /// Source the slot is migrating from, if a migration is in progress.
    pub migrate_from: Option<Endpoint>,

    /// Replica groups for read-only traffic, in preference order.
    #[serde(default)]
    pub replica_groups: Vec<Vec<String>>,

    /// Keep the slot gated after it has been filled.
    #[serde(default)]
    pub locked: bool,

    /// Backend was installed by a master switch rather than a slot move.
    #[serde(default)]
    pub switched: bool,
}

impl SlotDescriptor {
    /// An empty descriptor for `id`; filling it drains the slot.
    pub fn empty(id: SlotId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Set the backend endpoint.
    pub fn with_backend(mut self, addr: impl Into<String>, group_id: GroupId) -> Self {
        self.backend = Some(Endpoint::new(addr, group_id));
        self
    }

    /// Set the migration source endpoint.
    pub fn with_migrate_from(mut self, addr: impl Into<String>, group_id: GroupId) -> Self {
        self.migrate_from = Some(Endpoint::new(addr, group_id));
        self
    }

    /// Append a replica group.
    pub fn with_replica_group<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replica_groups
            .push(addrs.into_iter().map(Into::into).collect());
        self
    }

    /// Request that the slot stay gated after the fill.
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Backend address, if any.
    pub fn backend_addr(&self) -> Option<&str> {
        self.backend.as_ref().map(|e| e.addr.as_str())
    }

    /// Migration source address, if any.
    pub fn migrate_addr(&self) -> Option<&str> {
        self.migrate_from.as_ref().map(|e| e.addr.as_str())
    }

    /// Check the descriptor is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.migrate_from.is_some() && self.backend.is_none() {
            return Err(format!(
                "slot {} has a migration source but no backend",
                self.id
            ));
        }
        for endpoint in self.backend.iter().chain(self.migrate_from.iter()) {
            if endpoint.addr.is_empty() {
                return Err(format!("slot {} has an empty backend address", self.id));
            }
        }
        if self.replica_groups.iter().flatten().any(|addr| addr.is_empty()) {
            return Err(format!("slot {} has an empty replica address", self.id));
        }
        Ok(())
    }
}
