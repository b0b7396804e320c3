//! The `reduce_within_group` capability used by the tree reduction.
//!
//! Given one register per lane, leave in lane 0 of every `width`-lane
//! segment the total of that segment. How lanes exchange values is up to the
//! implementation: register shuffles where the hardware has them, shared
//! memory and barriers where it does not.

use serde::{Deserialize, Serialize};

use crate::device::GroupContext;

/// Which exchange primitive the tree reduction uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    /// Register-to-register shuffle inside a sub-group.
    Shuffle,
    /// Shared memory with a group barrier per step.
    #[value(name = "shared")]
    SharedMemory,
}

pub trait SubgroupReduce: Send + Sync {
    /// Tree-reduces every `width`-lane segment of `values` into its first lane.
    ///
    /// `width` is a power of two, at most the sub-group width, and divides
    /// `values.len()`. Lanes other than segment leaders hold partial sums
    /// afterwards.
    fn reduce_within_group(&self, group: &mut GroupContext<'_>, values: &mut [u32], width: u32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleExchange;

impl SubgroupReduce for ShuffleExchange {
    fn reduce_within_group(&self, group: &mut GroupContext<'_>, values: &mut [u32], width: u32) {
        let mut offset = width / 2;
        while offset > 0 {
            let up = group.shuffle_down(values, offset, width);
            for (lane, (value, up)) in values.iter_mut().zip(up).enumerate() {
                if (lane as u32 % width) < offset {
                    *value += up;
                }
            }
            offset /= 2;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SharedMemoryExchange;

impl SubgroupReduce for SharedMemoryExchange {
    fn reduce_within_group(&self, group: &mut GroupContext<'_>, values: &mut [u32], width: u32) {
        let scratch = group.alloc_shared(values.len());
        for (lane, &value) in values.iter().enumerate() {
            group.store(scratch, lane, value);
        }
        group.sync_threads();

        let mut offset = width / 2;
        while offset > 0 {
            for lane in 0..values.len() {
                if (lane as u32 % width) < offset {
                    let sum = group.load(scratch, lane) + group.load(scratch, lane + offset as usize);
                    group.store(scratch, lane, sum);
                }
            }
            group.sync_threads();
            offset /= 2;
        }

        for (lane, value) in values.iter_mut().enumerate() {
            *value = group.load(scratch, lane);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Dim2, LaunchGeometry};

    fn reduce_with(exchange: &dyn SubgroupReduce, values: &mut [u32], width: u32) {
        let geometry = LaunchGeometry::linear(values.len(), values.len() as u32, 32).unwrap();
        let mut group = GroupContext::new(Dim2::new(0, 0), &geometry);
        exchange.reduce_within_group(&mut group, values, width);
    }

    #[test]
    fn shuffle_leaves_segment_totals_in_leaders() {
        let mut values: Vec<u32> = (1..=64).collect();
        reduce_with(&ShuffleExchange, &mut values, 32);
        assert_eq!(values[0], (1..=32).sum::<u32>());
        assert_eq!(values[32], (33..=64).sum::<u32>());
    }

    #[test]
    fn shared_memory_matches_shuffle() {
        let input: Vec<u32> = (0..64).map(|i| (i * 7) % 13).collect();
        for width in [1, 2, 4, 8, 16, 32] {
            let mut shuffled = input.clone();
            let mut staged = input.clone();
            reduce_with(&ShuffleExchange, &mut shuffled, width);
            reduce_with(&SharedMemoryExchange, &mut staged, width);
            for leader in (0..input.len()).step_by(width as usize) {
                assert_eq!(shuffled[leader], staged[leader], "width {width}, lane {leader}");
            }
        }
    }

    #[test]
    fn width_one_is_identity() {
        let mut values = vec![3, 1, 4, 1];
        reduce_with(&ShuffleExchange, &mut values, 1);
        assert_eq!(values, vec![3, 1, 4, 1]);
    }
}
