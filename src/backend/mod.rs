//! Backend connection abstraction and the shared connection pools.
//!
//! The transport itself (dialing, read/write loops, reply correlation) lives
//! outside this crate behind [`BackendConnection`]. The router only needs to
//! hand requests over, ask the migration source to move a key, and probe
//! liveness.
//!
//! # Ownership
//!
//! ```text
//!   Slot 0 ──┐                 ┌── SharedConn "10.0.0.1:6379" (refs = 2)
//!   Slot 1 ──┼── retain/release┤       ├── BackendConnection #0
//!   Slot 7 ──┘                 │       └── BackendConnection #1
//!                              └── SharedConn "10.0.0.2:6379" (refs = 1)
//! ```

pub mod pool;

pub use pool::{SharedConn, SharedConnPool};

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::request::Request;
use std::fmt::Debug;
use std::sync::Arc;

/// A single connection to a backend instance.
///
/// Implementations own their reconnect logic; the pool only decides when a
/// handle is created and when it is closed.
pub trait BackendConnection: Send + Sync + Debug {
    /// Address this connection dials.
    fn addr(&self) -> &str;

    /// Whether the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Queue a request for sending. Never blocks on the reply.
    fn push_back(&self, request: Arc<Request>);

    /// Synchronously ask this instance (a migration source) to move the key
    /// group identified by `hash_key` to its new owner. `Ok` means the key is
    /// no longer authoritative here.
    fn migrate_key(&self, hash_key: &[u8], seed: u64) -> Result<(), BackendError>;

    /// Lightweight liveness probe.
    fn keep_alive(&self) -> Result<(), BackendError>;

    /// Close the connection. Called once, when the last reference is released.
    fn close(&self);
}

/// Creates backend connections on behalf of a pool.
pub trait Connector: Send + Sync + Debug {
    /// Create a connection handle for `addr`. Dialing may happen lazily in the
    /// background; failures surface through [`BackendConnection::is_connected`].
    fn connect(&self, addr: &str, config: &BackendConfig) -> Arc<dyn BackendConnection>;
}
