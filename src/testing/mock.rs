//! In-memory backend connection doubles.

use crate::backend::{BackendConnection, Connector};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::request::Request;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A backend connection that records what it is asked to do.
#[derive(Debug)]
pub struct MockConnection {
    addr: String,
    connected: AtomicBool,
    /// When set, `is_connected` answers true this many more times, then false.
    connected_checks: Mutex<Option<usize>>,
    closed: AtomicBool,
    fail_migrate: AtomicBool,
    pushed: Mutex<Vec<Arc<Request>>>,
    pushed_after_close: AtomicUsize,
    migrated: Mutex<Vec<Vec<u8>>>,
    keepalives: AtomicUsize,
}

impl MockConnection {
    fn new(addr: &str, connected: bool, fail_migrate: bool) -> Self {
        Self {
            addr: addr.to_string(),
            connected: AtomicBool::new(connected),
            connected_checks: Mutex::new(None),
            closed: AtomicBool::new(false),
            fail_migrate: AtomicBool::new(fail_migrate),
            pushed: Mutex::new(Vec::new()),
            pushed_after_close: AtomicUsize::new(0),
            migrated: Mutex::new(Vec::new()),
            keepalives: AtomicUsize::new(0),
        }
    }

    /// Whether the pool closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn pushed(&self) -> Vec<Arc<Request>> {
        self.pushed.lock().clone()
    }

    /// Number of requests received so far.
    pub fn pushed_count(&self) -> usize {
        self.pushed.lock().len()
    }

    /// Requests received after `close` was called. Always 0 in a correct router.
    pub fn pushed_after_close(&self) -> usize {
        self.pushed_after_close.load(Ordering::SeqCst)
    }

    /// Keys this connection was asked to migrate.
    pub fn migrated_keys(&self) -> Vec<Vec<u8>> {
        self.migrated.lock().clone()
    }

    /// Number of successful keepalive probes.
    pub fn keepalive_count(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Report connected for the next `checks` calls to `is_connected` only.
    pub fn disconnect_after_checks(&self, checks: usize) {
        *self.connected_checks.lock() = Some(checks);
    }

    fn set_fail_migrate(&self, fail: bool) {
        self.fail_migrate.store(fail, Ordering::SeqCst);
    }
}

impl BackendConnection for MockConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Some(remaining) = self.connected_checks.lock().as_mut() {
            if *remaining == 0 {
                self.connected.store(false, Ordering::SeqCst);
            } else {
                *remaining -= 1;
            }
        }
        self.connected.load(Ordering::SeqCst)
    }

    fn push_back(&self, request: Arc<Request>) {
        if self.is_closed() {
            self.pushed_after_close.fetch_add(1, Ordering::SeqCst);
        }
        self.pushed.lock().push(request);
    }

    fn migrate_key(&self, hash_key: &[u8], _seed: u64) -> Result<(), BackendError> {
        if self.fail_migrate.load(Ordering::SeqCst) {
            return Err(BackendError::Migrate(format!(
                "injected failure on {}",
                self.addr
            )));
        }
        self.migrated.lock().push(hash_key.to_vec());
        Ok(())
    }

    fn keep_alive(&self) -> Result<(), BackendError> {
        if !self.is_connected() {
            return Err(BackendError::Disconnected(self.addr.clone()));
        }
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector producing [`MockConnection`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    created: Mutex<Vec<Arc<MockConnection>>>,
    down: Mutex<HashSet<String>>,
    failing_migrate: Mutex<HashSet<String>>,
}

impl MockConnector {
    /// Create a connector with every address reachable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection ever created for `addr`, oldest first.
    pub fn connections(&self, addr: &str) -> Vec<Arc<MockConnection>> {
        self.created
            .lock()
            .iter()
            .filter(|c| c.addr == addr)
            .cloned()
            .collect()
    }

    /// Most recently created connection for `addr`.
    pub fn connection(&self, addr: &str) -> Option<Arc<MockConnection>> {
        self.connections(addr).pop()
    }

    /// How many connections were created for `addr`.
    pub fn connect_count(&self, addr: &str) -> usize {
        self.connections(addr).len()
    }

    /// Connections for `addr` not yet closed.
    pub fn live_connections(&self, addr: &str) -> usize {
        self.connections(addr)
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    /// Total requests pushed to any connection for `addr`.
    pub fn pushed_to(&self, addr: &str) -> usize {
        self.connections(addr).iter().map(|c| c.pushed_count()).sum()
    }

    /// Requests pushed to closed connections across all addresses.
    pub fn pushed_after_close(&self) -> usize {
        self.created
            .lock()
            .iter()
            .map(|c| c.pushed_after_close())
            .sum()
    }

    /// Keys migrated off any connection for `addr`.
    pub fn migrated_keys(&self, addr: &str) -> Vec<Vec<u8>> {
        self.connections(addr)
            .iter()
            .flat_map(|c| c.migrated_keys())
            .collect()
    }

    /// Mark `addr` reachable or not, for existing and future connections.
    pub fn set_connected(&self, addr: &str, connected: bool) {
        {
            let mut down = self.down.lock();
            if connected {
                down.remove(addr);
            } else {
                down.insert(addr.to_string());
            }
        }
        for conn in self.connections(addr) {
            conn.set_connected(connected);
        }
    }

    /// Make key migration off `addr` fail or succeed.
    pub fn set_migrate_failing(&self, addr: &str, failing: bool) {
        {
            let mut failing_set = self.failing_migrate.lock();
            if failing {
                failing_set.insert(addr.to_string());
            } else {
                failing_set.remove(addr);
            }
        }
        for conn in self.connections(addr) {
            conn.set_fail_migrate(failing);
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, addr: &str, _config: &BackendConfig) -> Arc<dyn BackendConnection> {
        let connected = !self.down.lock().contains(addr);
        let fail_migrate = self.failing_migrate.lock().contains(addr);
        let conn = Arc::new(MockConnection::new(addr, connected, fail_migrate));
        self.created.lock().push(conn.clone());
        conn
    }
}
