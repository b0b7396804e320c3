use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{GroupContext, GroupKernel};

/// Every in-range lane adds its element straight into the global sum.
pub struct AtomicReduce<'a> {
    values: &'a [u8],
    sum: &'a AtomicU64,
}

impl<'a> AtomicReduce<'a> {
    pub fn new(values: &'a [u8], sum: &'a AtomicU64) -> Self {
        Self { values, sum }
    }
}

impl GroupKernel for AtomicReduce<'_> {
    fn name(&self) -> &'static str {
        "reduce_atomic"
    }

    fn run(&self, group: &mut GroupContext<'_>) {
        for lane in 0..group.lanes() {
            let value = usize::try_from(group.global_index(lane))
                .ok()
                .and_then(|index| self.values.get(index));
            if let Some(&value) = value {
                self.sum.fetch_add(u64::from(value), Ordering::Relaxed);
            }
        }
    }
}
