//! Configuration types for the slot router.

use crate::error::{Error, Result};
use std::time::Duration;

/// Main configuration for the router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Parallel connections opened per primary backend address.
    pub primary_parallel: usize,

    /// Parallel connections opened per replica address.
    pub replica_parallel: usize,

    /// Route read-only requests to replica groups when the slot has any.
    pub replica_reads: bool,

    /// Timeout the connector should apply when dialing a backend.
    pub connect_timeout: Duration,

    /// Period of the background keepalive loop.
    pub keepalive_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary_parallel: 1,
            replica_parallel: 1,
            replica_reads: true,
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

impl RouterConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of parallel connections per primary address.
    pub fn with_primary_parallel(mut self, parallel: usize) -> Self {
        self.primary_parallel = parallel;
        self
    }

    /// Set the number of parallel connections per replica address.
    pub fn with_replica_parallel(mut self, parallel: usize) -> Self {
        self.replica_parallel = parallel;
        self
    }

    /// Enable or disable replica reads.
    pub fn with_replica_reads(mut self, enabled: bool) -> Self {
        self.replica_reads = enabled;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the keepalive period.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Check the configuration for values the router cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.primary_parallel == 0 {
            return Err(Error::Config("primary_parallel must be at least 1".into()));
        }
        if self.replica_parallel == 0 {
            return Err(Error::Config("replica_parallel must be at least 1".into()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(Error::Config("keepalive_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Connection settings for the primary pool.
    pub fn primary_backend(&self) -> BackendConfig {
        BackendConfig {
            parallel: self.primary_parallel,
            connect_timeout: self.connect_timeout,
            role: BackendRole::Primary,
        }
    }

    /// Connection settings for the replica pool.
    pub fn replica_backend(&self) -> BackendConfig {
        BackendConfig {
            parallel: self.replica_parallel,
            connect_timeout: self.connect_timeout,
            role: BackendRole::Replica,
        }
    }
}

/// Role a pool serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    /// Masters: slot backends and migration sources.
    Primary,
    /// Read replicas.
    Replica,
}

impl std::fmt::Display for BackendRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendRole::Primary => write!(f, "primary"),
            BackendRole::Replica => write!(f, "replica"),
        }
    }
}

/// Per-address connection settings handed to the connector.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Number of parallel connections to open.
    pub parallel: usize,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Role of the owning pool.
    pub role: BackendRole,
}
