//! Vector reduction: the sum of `u8` values as a `u64`.
//!
//! Two kernels are available. [`ReduceKernel::Atomic`] has every lane add its
//! element to the global accumulator. [`ReduceKernel::Tree`] first reduces
//! inside each sub-group, stages the sub-group totals in shared memory,
//! reduces those in the first sub-group and commits a single atomic add per
//! group.

pub mod atomic;
pub mod exchange;
pub mod tree;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::device::{Device, Emulator, LaunchGeometry, Timed};
use crate::error::{DeviceError, Mismatch};

pub use exchange::{Exchange, SharedMemoryExchange, ShuffleExchange, SubgroupReduce};

/// Lanes per group unless configured otherwise.
pub const DEFAULT_GROUP_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceKernel {
    /// One atomic add per element.
    Atomic,
    /// Two-phase tree reduction, one atomic add per group.
    Tree(Exchange),
}

impl Default for ReduceKernel {
    fn default() -> Self {
        ReduceKernel::Tree(Exchange::Shuffle)
    }
}

impl ReduceKernel {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceKernel::Atomic => "reduce_atomic",
            ReduceKernel::Tree(Exchange::Shuffle) => "reduce_shuffle",
            ReduceKernel::Tree(Exchange::SharedMemory) => "reduce_shared",
        }
    }

    /// Checks the constraints the kernel places on the group shape.
    ///
    /// The tree kernel needs power-of-two group and sub-group sizes, and the
    /// sub-group totals of a group must fit in a single sub-group for the
    /// second phase.
    pub fn validate(&self, geometry: &LaunchGeometry) -> Result<(), DeviceError> {
        let ReduceKernel::Tree(_) = self else {
            return Ok(());
        };
        let lanes = geometry.group_size();
        let width = geometry.subgroup_width;
        if geometry.block.y != 1 {
            return Err(DeviceError::InvalidConfiguration(
                "tree reduction expects one-dimensional groups".to_string(),
            ));
        }
        if !lanes.is_power_of_two() {
            return Err(DeviceError::InvalidConfiguration(format!(
                "group size {} is not a power of two",
                lanes
            )));
        }
        if !width.is_power_of_two() || width > lanes {
            return Err(DeviceError::InvalidConfiguration(format!(
                "sub-group width {} must be a power of two no larger than the group size {}",
                width, lanes
            )));
        }
        let subgroups = lanes / width;
        if subgroups > width {
            return Err(DeviceError::InvalidConfiguration(format!(
                "{} sub-group totals do not fit in one sub-group of {} lanes",
                subgroups, width
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceOptions {
    pub kernel: ReduceKernel,
    pub group_size: u32,
}

impl ReduceOptions {
    /// One lane per element: `ceil(len / group_size)` groups.
    pub fn geometry(&self, len: usize, subgroup_width: u32) -> Result<LaunchGeometry, DeviceError> {
        LaunchGeometry::linear(len, self.group_size, subgroup_width)
    }
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            kernel: ReduceKernel::default(),
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

/// Sums `values` on `device` with the sub-group width the device reports.
///
/// An empty input is summed without launching anything.
pub fn reduce_sum<D: Device + ?Sized>(
    device: &D,
    values: &[u8],
    options: &ReduceOptions,
) -> Result<Timed<u64>, DeviceError> {
    if values.is_empty() {
        debug!("empty input, skipping the launch");
        return Ok(Timed::immediate(0));
    }
    let geometry = options.geometry(values.len(), device.properties().subgroup_width)?;
    options.kernel.validate(&geometry)?;
    debug!(
        "{} over {} items: {} groups of {} lanes, {} sub-groups each",
        options.kernel.name(),
        values.len(),
        geometry.grid.x,
        geometry.group_size(),
        geometry.subgroups_per_group()
    );
    device.reduce(options.kernel, values, &geometry)
}

/// Sums `values` with the default kernel on a default [`Emulator`].
pub fn sum(values: &[u8]) -> Result<u64, DeviceError> {
    reduce_sum(&Emulator::default(), values, &ReduceOptions::default()).map(|timed| timed.value)
}

/// Sequential host reference.
pub fn reduce_cpu(values: &[u8]) -> u64 {
    values.iter().map(|&value| u64::from(value)).sum()
}

/// Compares a device sum with the host reference.
pub fn verify(values: &[u8], actual: u64) -> Result<(), Mismatch> {
    let expected = reduce_cpu(values);
    if expected == actual {
        Ok(())
    } else {
        Err(Mismatch::new("sum", expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(group_size: u32, width: u32) -> LaunchGeometry {
        LaunchGeometry::linear(10_000, group_size, width).unwrap()
    }

    #[test]
    fn tree_accepts_common_shapes() {
        let tree = ReduceKernel::Tree(Exchange::Shuffle);
        assert!(tree.validate(&linear(1024, 32)).is_ok());
        assert!(tree.validate(&linear(1024, 64)).is_ok());
        assert!(tree.validate(&linear(64, 32)).is_ok());
        assert!(tree.validate(&linear(32, 32)).is_ok());
    }

    #[test]
    fn tree_rejects_non_power_of_two_groups() {
        let tree = ReduceKernel::Tree(Exchange::Shuffle);
        assert!(tree.validate(&linear(1000, 32)).is_err());
    }

    #[test]
    fn tree_rejects_groups_smaller_than_a_subgroup() {
        let tree = ReduceKernel::Tree(Exchange::SharedMemory);
        assert!(tree.validate(&linear(16, 32)).is_err());
    }

    #[test]
    fn tree_rejects_too_many_subgroups() {
        let tree = ReduceKernel::Tree(Exchange::Shuffle);
        assert!(tree.validate(&linear(1024, 16)).is_err());
    }

    #[test]
    fn atomic_accepts_any_group_size() {
        assert!(ReduceKernel::Atomic.validate(&linear(1000, 32)).is_ok());
    }

    #[test]
    fn cpu_reference_does_not_overflow_u8() {
        assert_eq!(reduce_cpu(&[255; 1000]), 255_000);
    }

    #[test]
    fn verify_reports_expected_and_actual() {
        let err = verify(&[1, 2, 3], 5).unwrap_err();
        assert_eq!(err.expected, "6");
        assert_eq!(err.actual, "5");
    }

    #[test]
    fn one_group_per_started_block_of_elements() {
        let options = ReduceOptions::default();
        assert_eq!(options.geometry(1_000_000, 32).unwrap().grid.x, 977);
        assert_eq!(options.geometry(1024, 32).unwrap().grid.x, 1);
        assert_eq!(options.geometry(0, 32).unwrap().grid.x, 0);
    }

    #[test]
    fn kernel_names() {
        assert_eq!(ReduceKernel::Atomic.name(), "reduce_atomic");
        assert_eq!(ReduceKernel::default().name(), "reduce_shuffle");
    }
}
