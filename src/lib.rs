//! Slot routing core for a sharded key-value proxy.
//!
//! This crate decides, for every client request, which backend connection
//! receives it:
//! - A fixed table of [`MAX_SLOT_NUM`] slots maps hashed keys to shards
//! - Each slot can be reconfigured atomically and live-migrated
//! - Backend connections are reference counted and shared across slots
//!
//! # Example
//!
//! ```rust
//! use slotproxy::testing::MockConnector;
//! use slotproxy::{Request, Router, RouterConfig, SlotDescriptor};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(MockConnector::new());
//! let router = Router::new(RouterConfig::default(), connector)?;
//! router.start();
//!
//! // The metadata layer assigns slots to groups.
//! let slot = slotproxy::router::hash::slot_for_key(b"user:1");
//! router.fill_slot(&SlotDescriptor::empty(slot).with_backend("10.0.0.1:6379", 1))?;
//!
//! // Requests are routed by key.
//! let request = Request::with_key("GET", "user:1").shared();
//! router.dispatch(&request)?;
//! assert_eq!(request.destination().as_deref(), Some("10.0.0.1:6379"));
//!
//! // Group 1 fails over to a new master.
//! router.switch_masters(&HashMap::from([(1, "10.0.0.2:6379".to_string())]))?;
//! assert!(router.has_switched());
//!
//! router.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Router                           │
//! │  fill_slot / switch_masters / dispatch / close           │
//! └──────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │   Slot[0..MAX_SLOT_NUM]  │   │  SharedConnPool × 2      │
//! │  backend / migrate /     │──▶│  primary, replica        │
//! │  replicas + gate         │   │  refcounted by address   │
//! └──────────────────────────┘   └──────────────────────────┘
//!                                              │
//!                                              ▼
//!                                ┌──────────────────────────┐
//!                                │  dyn BackendConnection   │
//!                                └──────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod request;
pub mod router;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendConnection, Connector, SharedConn, SharedConnPool};
pub use config::{BackendConfig, BackendRole, RouterConfig};
pub use error::{BackendError, Error, Result};
pub use metrics::{RouterMetrics, RouterMetricsSnapshot};
pub use request::Request;
pub use router::{Forwarded, Role, Router, SlotStatus};
pub use types::{Endpoint, GroupId, SlotDescriptor, SlotId, MAX_SLOT_NUM};
