use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{GroupContext, GroupKernel};

use super::exchange::SubgroupReduce;

/// Two-phase tree reduction committing one atomic add per group.
pub struct TreeReduce<'a, X> {
    values: &'a [u8],
    sum: &'a AtomicU64,
    exchange: X,
}

impl<'a, X: SubgroupReduce> TreeReduce<'a, X> {
    pub fn new(values: &'a [u8], sum: &'a AtomicU64, exchange: X) -> Self {
        Self {
            values,
            sum,
            exchange,
        }
    }
}

impl<X: SubgroupReduce> GroupKernel for TreeReduce<'_, X> {
    fn name(&self) -> &'static str {
        "reduce_tree"
    }

    fn run(&self, group: &mut GroupContext<'_>) {
        let width = group.subgroup_width();
        let subgroups = group.subgroups();

        // Lanes past the end of the input contribute zero.
        let mut lanes: Vec<u32> = (0..group.lanes())
            .map(|lane| {
                usize::try_from(group.global_index(lane))
                    .ok()
                    .and_then(|index| self.values.get(index))
                    .map_or(0, |&value| u32::from(value))
            })
            .collect();

        self.exchange.reduce_within_group(group, &mut lanes, width);

        let partials = group.alloc_shared(subgroups as usize);
        for subgroup in 0..subgroups {
            let leader = (subgroup * width) as usize;
            group.store(partials, subgroup as usize, lanes[leader]);
        }
        group.sync_threads();

        // Only the first sub-group takes part; ranks without a partial add zero.
        let mut first: Vec<u32> = (0..width)
            .map(|rank| {
                if rank < subgroups {
                    group.load(partials, rank as usize)
                } else {
                    0
                }
            })
            .collect();
        self.exchange
            .reduce_within_group(group, &mut first, subgroups.next_power_of_two());

        self.sum.fetch_add(u64::from(first[0]), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Dim2, LaunchGeometry, POISON};
    use crate::reduce::exchange::{SharedMemoryExchange, ShuffleExchange};

    fn run_group<X: SubgroupReduce>(values: &[u8], group_size: u32, width: u32, exchange: X) -> u64 {
        let geometry = LaunchGeometry::linear(values.len(), group_size, width).unwrap();
        let sum = AtomicU64::new(0);
        let kernel = TreeReduce::new(values, &sum, exchange);
        for group in 0..geometry.grid.x {
            kernel.run(&mut GroupContext::new(Dim2::new(group, 0), &geometry));
        }
        sum.into_inner()
    }

    #[test]
    fn single_partial_group() {
        assert_eq!(run_group(&[1, 2, 3, 4], 1024, 32, ShuffleExchange), 10);
    }

    #[test]
    fn subgroup_count_below_width_ignores_unwritten_slots() {
        // 64 lanes of width 32: two partials, thirty ranks read nothing.
        let values = vec![255u8; 100];
        assert_eq!(run_group(&values, 64, 32, ShuffleExchange), 25_500);
        assert_eq!(run_group(&values, 64, 32, SharedMemoryExchange), 25_500);
    }

    #[test]
    fn ragged_final_group() {
        // The second group holds 70 items: its last sub-groups load only zeros.
        let values = vec![7u8; 128 + 70];
        assert_eq!(run_group(&values, 128, 32, ShuffleExchange), 7 * 198);
    }

    #[test]
    fn wide_subgroups() {
        let values: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let expected: u64 = values.iter().map(|&v| u64::from(v)).sum();
        assert_eq!(run_group(&values, 1024, 64, ShuffleExchange), expected);
        assert_eq!(run_group(&values, 1024, 64, SharedMemoryExchange), expected);
    }

    /// Staging without the barrier: phase two would read poison.
    #[test]
    fn partials_are_invisible_before_the_barrier() {
        let geometry = LaunchGeometry::linear(64, 64, 32).unwrap();
        let mut group = GroupContext::new(Dim2::new(0, 0), &geometry);
        let partials = group.alloc_shared(2);
        group.store(partials, 0, 5);
        group.store(partials, 1, 6);
        assert_eq!(group.load(partials, 1), POISON);
        group.sync_threads();
        assert_eq!(group.load(partials, 1), 6);
    }
}
