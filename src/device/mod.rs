mod emulator;
pub mod memory;

#[cfg(feature = "cuda")]
pub mod cuda;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::matmul::{MatmulKernel, MatmulShape};
use crate::reduce::ReduceKernel;

pub use emulator::{Emulator, EmulatorBuilder, GroupContext, GroupKernel, Shared, POISON};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub name: String,
    /// Lanes that exchange registers without a barrier (warp / wavefront).
    pub subgroup_width: u32,
    pub max_group_size: u32,
    pub max_groups: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim2 {
    pub x: u32,
    pub y: u32,
}

impl Dim2 {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1 }
    }

    pub fn count(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchGeometry {
    pub grid: Dim2,
    pub block: Dim2,
    pub subgroup_width: u32,
}

impl LaunchGeometry {
    /// One lane per item: `ceil(items / group_size)` groups of `group_size` lanes.
    pub fn linear(items: usize, group_size: u32, subgroup_width: u32) -> Result<Self, DeviceError> {
        if group_size == 0 {
            return Err(DeviceError::InvalidConfiguration(
                "group size must be non-zero".to_string(),
            ));
        }
        let groups = items.div_ceil(group_size as usize);
        let groups = u32::try_from(groups).map_err(|_| {
            DeviceError::InvalidConfiguration(format!(
                "{} items need {} groups of {}, more than a grid dimension can hold",
                items, groups, group_size
            ))
        })?;
        Ok(Self {
            grid: Dim2::linear(groups),
            block: Dim2::linear(group_size),
            subgroup_width,
        })
    }

    /// One lane per cell of a `rows x cols` output, in square groups of `tile x tile` lanes.
    pub fn tiled(
        rows: usize,
        cols: usize,
        tile: u32,
        subgroup_width: u32,
    ) -> Result<Self, DeviceError> {
        if tile == 0 {
            return Err(DeviceError::InvalidConfiguration(
                "tile size must be non-zero".to_string(),
            ));
        }
        let tiles = |extent: usize| {
            u32::try_from(extent.div_ceil(tile as usize)).map_err(|_| {
                DeviceError::InvalidConfiguration(format!(
                    "extent {} needs too many tiles of {}",
                    extent, tile
                ))
            })
        };
        Ok(Self {
            grid: Dim2::new(tiles(cols)?, tiles(rows)?),
            block: Dim2::new(tile, tile),
            subgroup_width,
        })
    }

    pub fn group_size(&self) -> u32 {
        self.block.x.saturating_mul(self.block.y)
    }

    pub fn group_count(&self) -> u64 {
        self.grid.count()
    }

    pub fn subgroups_per_group(&self) -> u32 {
        self.group_size().div_ceil(self.subgroup_width)
    }

    pub fn validate(&self, properties: &DeviceProperties) -> Result<(), DeviceError> {
        let lanes = self.block.count();
        if lanes == 0 || lanes > u64::from(properties.max_group_size) {
            return Err(DeviceError::InvalidConfiguration(format!(
                "group of {} lanes, device allows 1..={}",
                lanes, properties.max_group_size
            )));
        }
        if self.subgroup_width != properties.subgroup_width {
            return Err(DeviceError::InvalidConfiguration(format!(
                "sub-group width {} does not match the device width {}",
                self.subgroup_width, properties.subgroup_width
            )));
        }
        if self.grid.x > properties.max_groups || self.grid.y > properties.max_groups {
            return Err(DeviceError::InvalidConfiguration(format!(
                "grid {}x{} exceeds the device limit of {} groups per dimension",
                self.grid.x, self.grid.y, properties.max_groups
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    pub fn new(value: T, elapsed: Duration) -> Self {
        Self { value, elapsed }
    }

    /// A result that needed no kernel launch.
    pub fn immediate(value: T) -> Self {
        Self::new(value, Duration::ZERO)
    }
}

/// Every call releases its device allocations before returning, on error too.
pub trait Device {
    fn properties(&self) -> &DeviceProperties;

    fn reduce(
        &self,
        kernel: ReduceKernel,
        values: &[u8],
        geometry: &LaunchGeometry,
    ) -> Result<Timed<u64>, DeviceError>;

    fn matmul(
        &self,
        kernel: MatmulKernel,
        lhs: &[i32],
        rhs: &[i32],
        shape: MatmulShape,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError>;

    fn transpose(
        &self,
        input: &[i32],
        rows: usize,
        cols: usize,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties() -> DeviceProperties {
        DeviceProperties {
            name: "test".to_string(),
            subgroup_width: 32,
            max_group_size: 1024,
            max_groups: 65_535,
        }
    }

    #[test]
    fn linear_geometry_rounds_groups_up() {
        let geometry = LaunchGeometry::linear(1_000_000, 1024, 32).unwrap();
        assert_eq!(geometry.grid, Dim2::linear(977));
        assert_eq!(geometry.group_size(), 1024);
        assert_eq!(geometry.subgroups_per_group(), 32);
    }

    #[test]
    fn linear_geometry_exact_multiple() {
        let geometry = LaunchGeometry::linear(4096, 1024, 32).unwrap();
        assert_eq!(geometry.group_count(), 4);
    }

    #[test]
    fn zero_group_size_is_rejected() {
        assert!(matches!(
            LaunchGeometry::linear(10, 0, 32),
            Err(DeviceError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn tiled_geometry_covers_ragged_edges() {
        let geometry = LaunchGeometry::tiled(33, 17, 16, 32).unwrap();
        assert_eq!(geometry.grid, Dim2::new(2, 3));
        assert_eq!(geometry.block, Dim2::new(16, 16));
    }

    #[test]
    fn validate_rejects_oversized_groups() {
        let geometry = LaunchGeometry::linear(10, 2048, 32).unwrap();
        assert!(geometry.validate(&properties()).is_err());
    }

    #[test]
    fn validate_rejects_foreign_subgroup_width() {
        let geometry = LaunchGeometry::linear(10, 1024, 64).unwrap();
        assert!(geometry.validate(&properties()).is_err());
    }

    #[test]
    fn validate_rejects_too_many_groups() {
        let geometry = LaunchGeometry::linear(70_000, 1, 32).unwrap();
        assert!(geometry.validate(&properties()).is_err());
    }

    #[test]
    fn validate_accepts_default_launch() {
        let geometry = LaunchGeometry::linear(1_000_000, 1024, 32).unwrap();
        assert!(geometry.validate(&properties()).is_ok());
    }
}
