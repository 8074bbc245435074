//! Testing utilities for the slot router.
//!
//! This module provides in-memory connection doubles so the router can be
//! exercised without a real backend:
//! - [`MockConnector`] creates [`MockConnection`]s and keeps every one it made
//! - Failure injection: disconnect an address, make key migration fail
//! - Inspection: requests pushed per address, migrated keys, keepalive probes
//!
//! # Example
//!
//! ```rust
//! use slotproxy::testing::MockConnector;
//! use slotproxy::{Request, Router, RouterConfig, SlotDescriptor};
//! use std::sync::Arc;
//!
//! let connector = Arc::new(MockConnector::new());
//! let router = Router::new(RouterConfig::default(), connector.clone()).unwrap();
//! router.start();
//!
//! for id in 0..slotproxy::MAX_SLOT_NUM as u32 {
//!     router
//!         .fill_slot(&SlotDescriptor::empty(id).with_backend("10.0.0.1:6379", 1))
//!         .unwrap();
//! }
//!
//! let request = Request::with_key("GET", "user:1").shared();
//! router.dispatch(&request).unwrap();
//! assert_eq!(connector.pushed_to("10.0.0.1:6379"), 1);
//! ```

mod mock;


pub use mock::{MockConnection, MockConnector};
