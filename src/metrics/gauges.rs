//! Last-value gauges.

use super::Desc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Holds whatever value was last set, e.g. a pool size.
#[derive(Debug)]
pub struct Gauge {
    desc: Desc,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Desc { name, help },
            value: AtomicI64::new(0),
        }
    }

    pub fn desc(&self) -> Desc {
        self.desc
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}
