//! Requests as seen by the routing core.
//!
//! The protocol layer parses client bytes into a [`Request`]; the router only
//! looks at the operation name, the routing keys and the selection seed, and
//! records where the request was finally sent.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// A parsed client request awaiting dispatch.
#[derive(Debug)]
pub struct Request {
    op: String,
    keys: Vec<Bytes>,
    seed: u64,
    read_only: bool,
    destination: Mutex<Option<String>>,
}

impl Request {
    /// Create a request for `op` with no routing keys.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            keys: Vec::new(),
            seed: 0,
            read_only: false,
            destination: Mutex::new(None),
        }
    }

    /// Create a single-key request.
    pub fn with_key(op: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Self::new(op).keys([key])
    }

    /// Set the routing keys.
    pub fn keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the selection seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Mark the request as read-only, making it eligible for replica reads.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Wrap in an `Arc` for dispatch.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Operation name, e.g. `GET`.
    pub fn op_name(&self) -> &str {
        &self.op
    }

    /// Keys used to pick the slot.
    pub fn routing_keys(&self) -> &[Bytes] {
        &self.keys
    }

    /// Seed for choosing among parallel or replica connections, as set by
    /// [`Request::seed`].
    pub fn selection_seed(&self) -> u64 {
        self.seed
    }

    /// Whether the request only reads.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Address the request was handed to, once dispatched.
    pub fn destination(&self) -> Option<String> {
        self.destination.lock().clone()
    }

    pub(crate) fn set_destination(&self, addr: &str) {
        *self.destination.lock() = Some(addr.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = Request::new("MGET")
            .keys(["a", "b"])
            .seed(42)
            .read_only(true);

        assert_eq!(req.op_name(), "MGET");
        assert_eq!(req.routing_keys().len(), 2);
        assert_eq!(req.selection_seed(), 42);
        assert!(req.is_read_only());
        assert_eq!(req.destination(), None);

        req.set_destination("10.0.0.1:6379");
        assert_eq!(req.destination().as_deref(), Some("10.0.0.1:6379"));
    }
}
