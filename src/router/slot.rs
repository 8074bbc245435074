//! Per-slot routing state and admission gate.
//!
//! A slot moves between three routing states:
//!
//! ```text
//!            fill(backend)            fill(backend, migrate_from)
//!   Empty ───────────────▶ Active ─────────────────────────────▶ Migrating
//!     ▲                      │  ▲                                   │
//!     │      fill(empty)     │  └──────── fill(backend) ────────────┘
//!     └──────────────────────┘
//! ```
//!
//! Independently of those, the gate can be held ("locked"): no new request is
//! admitted while it is. Reconfiguration holds the gate, waits for requests
//! already admitted to finish routing, swaps the connections, and opens the
//! gate again unless the descriptor asks for it to stay locked.

use crate::backend::{BackendConnection, SharedConn, SharedConnPool};
use crate::config::RouterConfig;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::types::{Endpoint, GroupId, SlotDescriptor, SlotId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;

/// Which of a slot's connections a request is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The slot's current owner.
    Backend,
    /// The shard the slot is migrating away from.
    MigrationSource,
    /// A member of a replica group.
    Replica { group: usize, index: usize },
}

/// Routing state of a slot, ignoring the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// No backend assigned.
    Empty,
    /// Backend assigned, no migration.
    Active,
    /// Backend assigned and a migration source is still draining.
    Migrating,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Empty => write!(f, "empty"),
            SlotStatus::Active => write!(f, "active"),
            SlotStatus::Migrating => write!(f, "migrating"),
        }
    }
}

/// Outcome of a successful forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarded {
    /// Role of the connection that received the request.
    pub role: Role,
    /// Address of that connection.
    pub addr: String,
    /// Whether the routing keys were first migrated off the migration source.
    pub migrated: bool,
}

#[derive(Debug)]
struct Link {
    conn: Arc<SharedConn>,
    group_id: GroupId,
}

impl Link {
    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.conn.addr(), self.group_id)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    backend: Option<Link>,
    migrate: Option<Link>,
    replica_groups: Vec<Vec<Arc<SharedConn>>>,
    switched: bool,
}

impl SlotState {
    fn shared(&self, role: Role) -> Option<&Arc<SharedConn>> {
        match role {
            Role::Backend => self.backend.as_ref().map(|l| &l.conn),
            Role::MigrationSource => self.migrate.as_ref().map(|l| &l.conn),
            Role::Replica { group, index } => self.replica_groups.get(group)?.get(index),
        }
    }

    /// Pick a connected replica, walking groups in order and rotating from
    /// the seed within each group. The handle found connected is the one
    /// returned, so the choice cannot go stale before the push.
    fn pick_replica(&self, seed: u64) -> Option<(Role, Arc<dyn BackendConnection>)> {
        for (group, members) in self.replica_groups.iter().enumerate() {
            let n = members.len();
            if n == 0 {
                continue;
            }
            let mut index = (seed % n as u64) as usize;
            for _ in 0..n {
                index = (index + 1) % n;
                if let Some(conn) = members[index].backend_conn(seed, false) {
                    return Some((Role::Replica { group, index }, conn.clone()));
                }
            }
        }
        None
    }

    fn status(&self) -> SlotStatus {
        match (&self.backend, &self.migrate) {
            (None, _) => SlotStatus::Empty,
            (Some(_), None) => SlotStatus::Active,
            (Some(_), Some(_)) => SlotStatus::Migrating,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    hold: bool,
    inflight: usize,
}

/// One entry of the slot table.
#[derive(Debug)]
pub struct Slot {
    id: SlotId,
    gate: Mutex<GateState>,
    drained: Condvar,
    state: RwLock<SlotState>,
}

/// Counts a request as in flight until dropped.
struct Admission<'a> {
    slot: &'a Slot,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut gate = self.slot.gate.lock();
        gate.inflight -= 1;
        if gate.inflight == 0 && gate.hold {
            self.slot.drained.notify_all();
        }
    }
}

impl Slot {
    /// Create an empty, open slot.
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            gate: Mutex::new(GateState::default()),
            drained: Condvar::new(),
            state: RwLock::new(SlotState::default()),
        }
    }

    /// Slot id.
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Current routing state.
    pub fn status(&self) -> SlotStatus {
        self.state.read().status()
    }

    /// Whether the gate is held.
    pub fn is_locked(&self) -> bool {
        self.gate.lock().hold
    }

    /// Whether the backend was installed by a master switch.
    pub fn is_switched(&self) -> bool {
        self.state.read().switched
    }

    /// Group ids of the backend and migration source (0 when absent).
    pub fn group_ids(&self) -> (GroupId, GroupId) {
        let state = self.state.read();
        (
            state.backend.as_ref().map_or(0, |l| l.group_id),
            state.migrate.as_ref().map_or(0, |l| l.group_id),
        )
    }

    fn admit(&self) -> Result<Admission<'_>> {
        let mut gate = self.gate.lock();
        if gate.hold {
            return Err(Error::SlotNotReady(self.id));
        }
        gate.inflight += 1;
        Ok(Admission { slot: self })
    }

    /// Hold the gate and wait until every admitted request has been routed.
    pub(crate) fn block_and_wait(&self) {
        let mut gate = self.gate.lock();
        gate.hold = true;
        while gate.inflight > 0 {
            self.drained.wait(&mut gate);
        }
    }

    /// Open the gate.
    pub(crate) fn unblock(&self) {
        self.gate.lock().hold = false;
    }

    /// Route `request` to one of this slot's connections.
    ///
    /// While a migration is in progress, each of `hash_keys` is first moved
    /// off the migration source; the request goes to the backend only once
    /// every move succeeded. An empty `hash_keys` skips the migration check.
    pub fn forward(
        &self,
        request: &Arc<Request>,
        hash_keys: &[&[u8]],
        replica_reads: bool,
    ) -> Result<Forwarded> {
        let _admission = self.admit()?;
        let state = self.state.read();
        let Some(backend) = state.shared(Role::Backend) else {
            return Err(Error::SlotNotReady(self.id));
        };

        let seed = request.selection_seed();
        let mut migrated = false;
        if let Some(source) = state.shared(Role::MigrationSource) {
            for key in hash_keys {
                self.migrate_key(source, key, seed)?;
                migrated = true;
            }
        }

        let replica = if state.migrate.is_none() && replica_reads && request.is_read_only() {
            state.pick_replica(seed)
        } else {
            None
        };
        let (role, conn) = match replica {
            Some(picked) => picked,
            None => {
                let conn = backend
                    .backend_conn(seed, true)
                    .cloned()
                    .ok_or(Error::SlotNotReady(self.id))?;
                (Role::Backend, conn)
            }
        };

        request.set_destination(conn.addr());
        conn.push_back(request.clone());

        Ok(Forwarded {
            role,
            addr: conn.addr().to_string(),
            migrated,
        })
    }

    fn migrate_key(&self, source: &Arc<SharedConn>, key: &[u8], seed: u64) -> Result<()> {
        let conn: &Arc<dyn BackendConnection> =
            source
                .backend_conn(seed, true)
                .ok_or_else(|| Error::MigrationFailed {
                    slot: self.id,
                    from: source.addr().to_string(),
                    reason: "migration source closed".into(),
                })?;

        conn.migrate_key(key, seed).map_err(|e| {
            tracing::debug!(slot = self.id, from = source.addr(), error = %e, "Key migration failed");
            Error::MigrationFailed {
                slot: self.id,
                from: source.addr().to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Swap in the connections named by `desc`.
    ///
    /// Old connections are released only after in-flight routing drained, and
    /// the gate stays held throughout, so requests see either the old or the
    /// new configuration, never a mix.
    pub(crate) fn reconfigure(
        &self,
        desc: &SlotDescriptor,
        primary: &SharedConnPool,
        replica: &SharedConnPool,
        config: &RouterConfig,
    ) {
        self.block_and_wait();
        {
            let primary_config = config.primary_backend();
            let replica_config = config.replica_backend();

            // Retain before releasing so an address present in both the old
            // and the new configuration keeps its connection.
            let next = SlotState {
                backend: desc.backend.as_ref().map(|e| Link {
                    conn: primary.retain(&e.addr, &primary_config),
                    group_id: e.group_id,
                }),
                migrate: desc.migrate_from.as_ref().map(|e| Link {
                    conn: primary.retain(&e.addr, &primary_config),
                    group_id: e.group_id,
                }),
                replica_groups: desc
                    .replica_groups
                    .iter()
                    .filter(|group| !group.is_empty())
                    .map(|group| {
                        group
                            .iter()
                            .map(|addr| replica.retain(addr, &replica_config))
                            .collect()
                    })
                    .collect(),
                switched: desc.switched,
            };

            let old = std::mem::replace(&mut *self.state.write(), next);

            if let Some(link) = &old.backend {
                primary.release(&link.conn);
            }
            if let Some(link) = &old.migrate {
                primary.release(&link.conn);
            }
            for conn in old.replica_groups.iter().flatten() {
                replica.release(conn);
            }
        }
        if !desc.locked {
            self.unblock();
        }
    }

    /// External view of the slot.
    pub fn snapshot(&self, include_replicas: bool) -> SlotDescriptor {
        let locked = self.is_locked();
        let state = self.state.read();
        SlotDescriptor {
            id: self.id,
            backend: state.backend.as_ref().map(Link::endpoint),
            migrate_from: state.migrate.as_ref().map(Link::endpoint),
            replica_groups: if include_replicas {
                state
                    .replica_groups
                    .iter()
                    .map(|group| group.iter().map(|c| c.addr().to_string()).collect())
                    .collect()
            } else {
                Vec::new()
            },
            locked,
            switched: state.switched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendRole;
    use crate::testing::MockConnector;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const KEY: &[&[u8]] = &[b"k"];

    struct Fixture {
        connector: Arc<MockConnector>,
        primary: SharedConnPool,
        replica: SharedConnPool,
        config: RouterConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let connector = Arc::new(MockConnector::new());
            Self {
                primary: SharedConnPool::new(BackendRole::Primary, connector.clone()),
                replica: SharedConnPool::new(BackendRole::Replica, connector.clone()),
                connector,
                config: RouterConfig::default(),
            }
        }

        fn fill(&self, slot: &Slot, desc: &SlotDescriptor) {
            slot.reconfigure(desc, &self.primary, &self.replica, &self.config);
        }
    }

    #[test]
    fn test_empty_slot_not_ready() {
        let slot = Slot::new(5);
        let req = Request::with_key("GET", "k").shared();

        assert_eq!(slot.status(), SlotStatus::Empty);
        assert!(matches!(
            slot.forward(&req, KEY, true),
            Err(Error::SlotNotReady(5))
        ));
        assert_eq!(req.destination(), None);
    }

    #[test]
    fn test_forward_to_backend() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(&slot, &SlotDescriptor::empty(1).with_backend("10.0.0.1:6379", 1));

        let req = Request::with_key("SET", "k").shared();
        let fwd = slot.forward(&req, KEY, true).unwrap();

        assert_eq!(fwd.role, Role::Backend);
        assert!(!fwd.migrated);
        assert_eq!(req.destination().as_deref(), Some("10.0.0.1:6379"));
        assert_eq!(fx.connector.pushed_to("10.0.0.1:6379"), 1);
        assert_eq!(slot.status(), SlotStatus::Active);
    }

    #[test]
    fn test_forward_while_migrating() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.2:6379", 2)
                .with_migrate_from("10.0.0.1:6379", 1),
        );
        assert_eq!(slot.status(), SlotStatus::Migrating);

        let req = Request::with_key("GET", "k").read_only(true).shared();
        let fwd = slot.forward(&req, KEY, true).unwrap();

        assert_eq!(fwd.role, Role::Backend);
        assert!(fwd.migrated);
        assert_eq!(fx.connector.migrated_keys("10.0.0.1:6379"), vec![b"k".to_vec()]);
        assert_eq!(fx.connector.pushed_to("10.0.0.2:6379"), 1);
        assert_eq!(fx.connector.pushed_to("10.0.0.1:6379"), 0);
    }

    #[test]
    fn test_failed_migration_blocks_request() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.2:6379", 2)
                .with_migrate_from("10.0.0.1:6379", 1),
        );
        fx.connector.set_migrate_failing("10.0.0.1:6379", true);

        let req = Request::with_key("GET", "k").shared();
        let err = slot.forward(&req, KEY, true).unwrap_err();

        assert!(matches!(err, Error::MigrationFailed { slot: 1, .. }));
        assert_eq!(fx.connector.pushed_to("10.0.0.2:6379"), 0);
        assert_eq!(req.destination(), None);
    }

    #[test]
    fn test_forward_without_hash_key_skips_migration() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.2:6379", 2)
                .with_migrate_from("10.0.0.1:6379", 1),
        );

        let req = Request::new("SLOTSINFO").shared();
        let fwd = slot.forward(&req, &[], true).unwrap();

        assert!(!fwd.migrated);
        assert!(fx.connector.migrated_keys("10.0.0.1:6379").is_empty());
        assert_eq!(fx.connector.pushed_to("10.0.0.2:6379"), 1);
    }

    #[test]
    fn test_replica_reads() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.1:6379", 1)
                .with_replica_group(["10.0.1.1:6379", "10.0.1.2:6379"]),
        );

        // Seed 0 rotates to index 1 first.
        let req = Request::with_key("GET", "k").read_only(true).seed(0).shared();
        let fwd = slot.forward(&req, KEY, true).unwrap();
        assert_eq!(fwd.role, Role::Replica { group: 0, index: 1 });
        assert_eq!(fwd.addr, "10.0.1.2:6379");

        // Writes always go to the backend.
        let req = Request::with_key("SET", "k").seed(0).shared();
        assert_eq!(slot.forward(&req, KEY, true).unwrap().role, Role::Backend);

        // Replica reads disabled.
        let req = Request::with_key("GET", "k").read_only(true).shared();
        assert_eq!(slot.forward(&req, KEY, false).unwrap().role, Role::Backend);
    }

    #[test]
    fn test_replica_reads_skip_disconnected() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.1:6379", 1)
                .with_replica_group(["10.0.1.1:6379", "10.0.1.2:6379"])
                .with_replica_group(["10.0.2.1:6379"]),
        );

        fx.connector.set_connected("10.0.1.2:6379", false);
        let req = Request::with_key("GET", "k").read_only(true).seed(0).shared();
        assert_eq!(
            slot.forward(&req, KEY, true).unwrap().role,
            Role::Replica { group: 0, index: 0 }
        );

        fx.connector.set_connected("10.0.1.1:6379", false);
        let req = Request::with_key("GET", "k").read_only(true).seed(0).shared();
        assert_eq!(
            slot.forward(&req, KEY, true).unwrap().role,
            Role::Replica { group: 1, index: 0 }
        );

        fx.connector.set_connected("10.0.2.1:6379", false);
        let req = Request::with_key("GET", "k").read_only(true).seed(0).shared();
        assert_eq!(slot.forward(&req, KEY, true).unwrap().role, Role::Backend);
    }

    #[test]
    fn test_replica_dropping_after_selection() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.1:6379", 1)
                .with_replica_group(["10.0.1.1:6379"]),
        );
        let replica = fx.connector.connection("10.0.1.1:6379").unwrap();
        replica.disconnect_after_checks(1);

        // The replica answers connected once, and that answer is honoured.
        let req = Request::with_key("GET", "k").read_only(true).shared();
        let fwd = slot.forward(&req, KEY, true).unwrap();
        assert_eq!(fwd.role, Role::Replica { group: 0, index: 0 });
        assert_eq!(replica.pushed_count(), 1);

        let req = Request::with_key("GET", "k").read_only(true).shared();
        let fwd = slot.forward(&req, KEY, true).unwrap();
        assert_eq!(fwd.role, Role::Backend);
        assert_eq!(fx.connector.pushed_to("10.0.0.1:6379"), 1);
    }

    #[test]
    fn test_forward_migrates_every_key() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.2:6379", 2)
                .with_migrate_from("10.0.0.1:6379", 1),
        );

        let req = Request::new("MGET").keys(["a", "b"]).shared();
        let fwd = slot.forward(&req, &[&b"a"[..], &b"b"[..]], true).unwrap();

        assert!(fwd.migrated);
        assert_eq!(
            fx.connector.migrated_keys("10.0.0.1:6379"),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert_eq!(fx.connector.pushed_to("10.0.0.2:6379"), 1);
    }

    #[test]
    fn test_locked_slot_rejects() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.1:6379", 1)
                .with_locked(true),
        );

        assert!(slot.is_locked());
        assert!(slot.snapshot(false).locked);
        let req = Request::with_key("GET", "k").shared();
        assert!(matches!(
            slot.forward(&req, KEY, true),
            Err(Error::SlotNotReady(1))
        ));

        fx.fill(&slot, &SlotDescriptor::empty(1).with_backend("10.0.0.1:6379", 1));
        assert!(!slot.is_locked());
        assert!(slot.forward(&req, KEY, true).is_ok());
    }

    #[test]
    fn test_reconfigure_releases_old_connections() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        fx.fill(
            &slot,
            &SlotDescriptor::empty(1)
                .with_backend("10.0.0.1:6379", 1)
                .with_replica_group(["10.0.1.1:6379"]),
        );
        assert_eq!(fx.primary.refcount("10.0.0.1:6379"), 1);
        assert_eq!(fx.replica.refcount("10.0.1.1:6379"), 1);

        fx.fill(&slot, &SlotDescriptor::empty(1).with_backend("10.0.0.2:6379", 2));
        assert_eq!(fx.primary.refcount("10.0.0.1:6379"), 0);
        assert_eq!(fx.primary.refcount("10.0.0.2:6379"), 1);
        assert!(fx.replica.is_empty());
        assert!(fx.connector.connection("10.0.0.1:6379").unwrap().is_closed());

        fx.fill(&slot, &SlotDescriptor::empty(1));
        assert!(fx.primary.is_empty());
        assert_eq!(slot.status(), SlotStatus::Empty);
    }

    #[test]
    fn test_refill_same_backend_keeps_connection() {
        let fx = Fixture::new();
        let slot = Slot::new(1);
        let desc = SlotDescriptor::empty(1).with_backend("10.0.0.1:6379", 1);

        fx.fill(&slot, &desc);
        fx.fill(&slot, &desc.clone().with_locked(true));
        fx.fill(&slot, &desc);

        assert_eq!(fx.primary.refcount("10.0.0.1:6379"), 1);
        assert_eq!(fx.connector.connect_count("10.0.0.1:6379"), 1);
        assert!(!fx.connector.connection("10.0.0.1:6379").unwrap().is_closed());
    }

    #[test]
    fn test_snapshot_matches_descriptor() {
        let fx = Fixture::new();
        let slot = Slot::new(9);
        let mut desc = SlotDescriptor::empty(9)
            .with_backend("10.0.0.2:6379", 2)
            .with_migrate_from("10.0.0.1:6379", 1)
            .with_replica_group(["10.0.1.1:6379", "10.0.1.2:6379"])
            .with_replica_group(Vec::<String>::new());
        desc.switched = true;
        fx.fill(&slot, &desc);

        let snap = slot.snapshot(true);
        assert_eq!(snap.backend, desc.backend);
        assert_eq!(snap.migrate_from, desc.migrate_from);
        assert_eq!(snap.replica_groups, vec![vec!["10.0.1.1:6379", "10.0.1.2:6379"]]);
        assert!(snap.switched);
        assert!(!snap.locked);

        assert!(slot.snapshot(false).replica_groups.is_empty());
        assert_eq!(slot.group_ids(), (2, 1));
    }

    #[test]
    fn test_block_and_wait_drains_inflight() {
        let slot = Arc::new(Slot::new(1));
        let admission_released = Arc::new(AtomicBool::new(false));

        let admission = slot.admit().unwrap();

        let blocker = {
            let slot = slot.clone();
            let released = admission_released.clone();
            std::thread::spawn(move || {
                slot.block_and_wait();
                assert!(released.load(Ordering::SeqCst));
            })
        };

        // Wait until the blocker holds the gate.
        while !slot.is_locked() {
            std::thread::yield_now();
        }
        assert!(matches!(slot.admit(), Err(Error::SlotNotReady(1))));

        std::thread::sleep(Duration::from_millis(20));
        admission_released.store(true, Ordering::SeqCst);
        drop(admission);

        blocker.join().unwrap();
        assert!(slot.is_locked());
        slot.unblock();
        assert!(slot.admit().is_ok());
    }
}
