//! Monotonic counters, plain and labeled.

use super::Desc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter that only goes up.
#[derive(Debug)]
pub struct Counter {
    desc: Desc,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Desc { name, help },
            value: AtomicU64::new(0),
        }
    }

    pub fn desc(&self) -> Desc {
        self.desc
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One counter per distinct set of label values.
///
/// Rejections are rare next to dispatches, so a single mutex over an ordered
/// map is enough and keeps [`LabeledCounter::get_all`] sorted for free.
#[derive(Debug)]
pub struct LabeledCounter<const N: usize> {
    desc: Desc,
    labels: [&'static str; N],
    values: Mutex<BTreeMap<[String; N], u64>>,
}

impl<const N: usize> LabeledCounter<N> {
    pub fn new(name: &'static str, help: &'static str, labels: [&'static str; N]) -> Self {
        Self {
            desc: Desc { name, help },
            labels,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn desc(&self) -> Desc {
        self.desc
    }

    /// Label names, in the order values are passed to [`LabeledCounter::inc`].
    pub fn labels(&self) -> [&'static str; N] {
        self.labels
    }

    pub fn inc(&self, values: [&str; N]) {
        *self
            .values
            .lock()
            .entry(values.map(str::to_owned))
            .or_default() += 1;
    }

    pub fn get(&self, values: [&str; N]) -> u64 {
        self.values
            .lock()
            .get(&values.map(str::to_owned))
            .copied()
            .unwrap_or(0)
    }

    /// Every label set seen so far, ordered by label values.
    pub fn get_all(&self) -> Vec<([String; N], u64)> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
