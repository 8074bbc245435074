//! Reference-counted backend connection pool.

use super::{BackendConnection, Connector};
use crate::config::{BackendConfig, BackendRole};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// All parallel connections to one backend address.
#[derive(Debug)]
pub struct SharedConn {
    addr: String,
    conns: Vec<Arc<dyn BackendConnection>>,
    closed: AtomicBool,
}

impl SharedConn {
    fn new(addr: &str, conns: Vec<Arc<dyn BackendConnection>>) -> Self {
        Self {
            addr: addr.to_string(),
            conns,
            closed: AtomicBool::new(false),
        }
    }

    /// Backend address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of parallel connections.
    pub fn parallel(&self) -> usize {
        self.conns.len()
    }

    /// Whether the pool has closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Pick a connection for a request with the given seed.
    ///
    /// Rotates from `seed` over the parallel connections and returns the first
    /// connected one. If none is connected, `must` returns the first handle
    /// anyway (it queues until reconnect); otherwise `None`.
    pub fn backend_conn(&self, seed: u64, must: bool) -> Option<&Arc<dyn BackendConnection>> {
        if self.is_closed() || self.conns.is_empty() {
            return None;
        }
        let n = self.conns.len();
        let mut i = (seed % n as u64) as usize;
        for _ in 0..n {
            i = (i + 1) % n;
            if self.conns[i].is_connected() {
                return Some(&self.conns[i]);
            }
        }
        if must {
            self.conns.first()
        } else {
            None
        }
    }

    fn keep_alive(&self) -> usize {
        let mut failures = 0;
        for conn in &self.conns {
            if let Err(e) = conn.keep_alive() {
                failures += 1;
                tracing::warn!(addr = %self.addr, error = %e, "Backend keepalive failed");
            }
        }
        failures
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for conn in &self.conns {
            conn.close();
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    conn: Arc<SharedConn>,
    refs: usize,
}

/// Address-keyed pool of shared connections for one role.
///
/// Reference counts live behind a single mutex and are only touched by
/// [`retain`](Self::retain) and [`release`](Self::release).
#[derive(Debug)]
pub struct SharedConnPool {
    role: BackendRole,
    connector: Arc<dyn Connector>,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl SharedConnPool {
    /// Create an empty pool.
    pub fn new(role: BackendRole, connector: Arc<dyn Connector>) -> Self {
        Self {
            role,
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Role this pool serves.
    pub fn role(&self) -> BackendRole {
        self.role
    }

    /// Get the shared connection for `addr`, creating it on first use, and
    /// take one reference on it.
    pub fn retain(&self, addr: &str, config: &BackendConfig) -> Arc<SharedConn> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(addr) {
            entry.refs += 1;
            return entry.conn.clone();
        }

        let parallel = config.parallel.max(1);
        let conns = (0..parallel)
            .map(|_| self.connector.connect(addr, config))
            .collect();
        let conn = Arc::new(SharedConn::new(addr, conns));
        entries.insert(
            addr.to_string(),
            PoolEntry {
                conn: conn.clone(),
                refs: 1,
            },
        );
        tracing::info!(role = %self.role, addr, parallel, "Backend connection created");
        conn
    }

    /// Drop one reference. The last release closes the connections.
    ///
    /// Releasing a connection the pool no longer tracks is a no-op.
    pub fn release(&self, conn: &Arc<SharedConn>) {
        let closing = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(conn.addr()) else {
                tracing::debug!(role = %self.role, addr = conn.addr(), "Release of unknown connection");
                return;
            };
            if !Arc::ptr_eq(&entry.conn, conn) || entry.refs == 0 {
                tracing::debug!(role = %self.role, addr = conn.addr(), "Release of stale connection");
                return;
            }
            entry.refs -= 1;
            if entry.refs > 0 {
                return;
            }
            entries.remove(conn.addr()).map(|entry| entry.conn)
        };

        if let Some(conn) = closing {
            tracing::info!(role = %self.role, addr = conn.addr(), "Backend connection closed");
            conn.close();
        }
    }

    /// Look up a connection without taking a reference.
    pub fn get(&self, addr: &str) -> Option<Arc<SharedConn>> {
        self.entries.lock().get(addr).map(|entry| entry.conn.clone())
    }

    /// Current reference count for `addr` (0 if absent).
    pub fn refcount(&self, addr: &str) -> usize {
        self.entries.lock().get(addr).map_or(0, |entry| entry.refs)
    }

    /// Number of live addresses.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Addresses currently pooled, sorted.
    pub fn addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.entries.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Probe every pooled connection. Failures are logged and counted, never
    /// returned as errors.
    pub fn keep_alive_all(&self) -> usize {
        let conns: Vec<Arc<SharedConn>> = self
            .entries
            .lock()
            .values()
            .map(|entry| entry.conn.clone())
            .collect();
        conns.iter().map(|conn| conn.keep_alive()).sum()
    }
}
