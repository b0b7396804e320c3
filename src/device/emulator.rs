//! Host emulation of a data-parallel device. Groups run on rayon; the lanes
//! of a group run in lockstep as lane vectors.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU64};
use std::time::{Duration, Instant};

use log::debug;
use rayon::prelude::*;
use rayon::ThreadPool;

use super::memory::MemoryLedger;
use super::{Device, DeviceProperties, Dim2, LaunchGeometry, Timed};
use crate::error::DeviceError;
use crate::matmul::kernels::{NaiveMatmul, TiledMatmul, Transpose};
use crate::matmul::{MatmulKernel, MatmulShape};
use crate::reduce::atomic::AtomicReduce;
use crate::reduce::exchange::{Exchange, SharedMemoryExchange, ShuffleExchange};
use crate::reduce::tree::TreeReduce;
use crate::reduce::ReduceKernel;

/// Contents of shared memory that no lane has written yet.
pub const POISON: u32 = 0xDEAD_BEEF;

pub trait GroupKernel: Sync {
    fn name(&self) -> &'static str;

    fn run(&self, group: &mut GroupContext<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shared(usize);

#[derive(Debug)]
struct SharedArray {
    visible: Vec<u32>,
    pending: Vec<u32>,
}

/// Shared memory holds 32-bit words; signed data is stored bit-cast.
#[derive(Debug)]
pub struct GroupContext<'g> {
    block_idx: Dim2,
    geometry: &'g LaunchGeometry,
    shared: Vec<SharedArray>,
}

impl<'g> GroupContext<'g> {
    pub fn new(block_idx: Dim2, geometry: &'g LaunchGeometry) -> Self {
        Self {
            block_idx,
            geometry,
            shared: Vec::new(),
        }
    }

    pub fn block_idx(&self) -> Dim2 {
        self.block_idx
    }

    pub fn block_dim(&self) -> Dim2 {
        self.geometry.block
    }

    pub fn lanes(&self) -> u32 {
        self.geometry.group_size()
    }

    pub fn subgroup_width(&self) -> u32 {
        self.geometry.subgroup_width
    }

    pub fn subgroups(&self) -> u32 {
        self.geometry.subgroups_per_group()
    }

    /// Position of `lane` inside the group, `x` varying fastest.
    pub fn thread_idx(&self, lane: u32) -> Dim2 {
        let dim = self.geometry.block;
        Dim2::new(lane % dim.x, lane / dim.x)
    }

    pub fn global_xy(&self, lane: u32) -> Dim2 {
        let dim = self.geometry.block;
        let thread = self.thread_idx(lane);
        Dim2::new(
            self.block_idx.x * dim.x + thread.x,
            self.block_idx.y * dim.y + thread.y,
        )
    }

    /// Flat index of `lane` across the whole launch.
    pub fn global_index(&self, lane: u32) -> u64 {
        let grid = self.geometry.grid;
        let group = u64::from(self.block_idx.y) * u64::from(grid.x) + u64::from(self.block_idx.x);
        group * u64::from(self.lanes()) + u64::from(lane)
    }

    pub fn alloc_shared(&mut self, len: usize) -> Shared {
        self.shared.push(SharedArray {
            visible: vec![POISON; len],
            pending: vec![POISON; len],
        });
        Shared(self.shared.len() - 1)
    }

    /// Stores a word; other lanes see it after the next barrier.
    pub fn store(&mut self, shared: Shared, index: usize, value: u32) {
        self.shared[shared.0].pending[index] = value;
    }

    pub fn load(&self, shared: Shared, index: usize) -> u32 {
        self.shared[shared.0].visible[index]
    }

    /// Group-wide barrier: publishes every store issued before it.
    pub fn sync_threads(&mut self) {
        for array in &mut self.shared {
            array.visible.copy_from_slice(&array.pending);
        }
    }

    /// Register exchange within `width`-lane segments of a sub-group.
    ///
    /// Lane `l` receives the value of lane `l + delta` when that lane is in
    /// the same segment, and keeps its own value otherwise.
    pub fn shuffle_down(&self, values: &[u32], delta: u32, width: u32) -> Vec<u32> {
        debug_assert!(width.is_power_of_two() && width <= self.subgroup_width());
        let width = width as usize;
        let delta = delta as usize;
        values
            .iter()
            .enumerate()
            .map(|(lane, &own)| {
                let rank = lane % width;
                if rank + delta < width {
                    values.get(lane + delta).copied().unwrap_or(own)
                } else {
                    own
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EmulatorBuilder {
    subgroup_width: u32,
    max_group_size: u32,
    max_groups: u32,
    threads: Option<usize>,
    memory_limit: Option<usize>,
}

impl Default for EmulatorBuilder {
    fn default() -> Self {
        Self {
            subgroup_width: 32,
            max_group_size: 1024,
            max_groups: i32::MAX as u32,
            threads: None,
            memory_limit: None,
        }
    }
}

impl EmulatorBuilder {
    pub fn subgroup_width(mut self, width: u32) -> Self {
        self.subgroup_width = width;
        self
    }

    pub fn max_group_size(mut self, lanes: u32) -> Self {
        self.max_group_size = lanes;
        self
    }

    pub fn max_groups(mut self, groups: u32) -> Self {
        self.max_groups = groups;
        self
    }

    /// Runs groups on a dedicated pool instead of the global rayon pool.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Caps the device memory; allocations beyond it fail.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn build(self) -> Result<Emulator, DeviceError> {
        if !self.subgroup_width.is_power_of_two() {
            return Err(DeviceError::Initialization(format!(
                "sub-group width {} is not a power of two",
                self.subgroup_width
            )));
        }
        if self.max_group_size == 0 {
            return Err(DeviceError::Initialization(
                "maximum group size must be non-zero".to_string(),
            ));
        }
        let pool = self
            .threads
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("emulator-{}", index))
                    .build()
                    .map_err(|err| DeviceError::Initialization(err.to_string()))
            })
            .transpose()?;
        Ok(self.assemble(pool))
    }

    fn assemble(self, pool: Option<ThreadPool>) -> Emulator {
        Emulator {
            properties: DeviceProperties {
                name: format!("emulator (sub-group width {})", self.subgroup_width),
                subgroup_width: self.subgroup_width,
                max_group_size: self.max_group_size,
                max_groups: self.max_groups,
            },
            memory: MemoryLedger::new(self.memory_limit),
            pool,
        }
    }
}

#[derive(Debug)]
pub struct Emulator {
    properties: DeviceProperties,
    memory: MemoryLedger,
    pool: Option<ThreadPool>,
}

impl Default for Emulator {
    fn default() -> Self {
        EmulatorBuilder::default().assemble(None)
    }
}

impl Emulator {
    pub fn builder() -> EmulatorBuilder {
        EmulatorBuilder::default()
    }

    /// Bytes currently held by live device buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.memory.in_use()
    }

    /// Runs `kernel` once per group and waits. A panic in the kernel becomes
    /// [`DeviceError::Fault`].
    pub fn launch<K: GroupKernel>(
        &self,
        kernel: &K,
        geometry: &LaunchGeometry,
    ) -> Result<Duration, DeviceError> {
        geometry.validate(&self.properties)?;
        debug!(
            "launching `{}`: grid {}x{}, group {}x{}, sub-group width {}",
            kernel.name(),
            geometry.grid.x,
            geometry.grid.y,
            geometry.block.x,
            geometry.block.y,
            geometry.subgroup_width
        );

        let grid_x = u64::from(geometry.grid.x);
        let dispatch = || {
            (0..geometry.group_count())
                .into_par_iter()
                .for_each(|linear| {
                    let block_idx = Dim2::new((linear % grid_x) as u32, (linear / grid_x) as u32);
                    let mut group = GroupContext::new(block_idx, geometry);
                    kernel.run(&mut group);
                });
        };

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &self.pool {
            Some(pool) => pool.install(dispatch),
            None => dispatch(),
        }));
        let elapsed = start.elapsed();

        outcome.map_err(|payload| DeviceError::Fault {
            kernel: kernel.name().to_string(),
            reason: panic_message(payload.as_ref()),
        })?;
        Ok(elapsed)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Device for Emulator {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn reduce(
        &self,
        kernel: ReduceKernel,
        values: &[u8],
        geometry: &LaunchGeometry,
    ) -> Result<Timed<u64>, DeviceError> {
        kernel.validate(geometry)?;
        let sum = self.memory.zeroed::<AtomicU64>(1)?;
        let input = self.memory.upload(values)?;

        let elapsed = match kernel {
            ReduceKernel::Atomic => self.launch(&AtomicReduce::new(&input, &sum[0]), geometry)?,
            ReduceKernel::Tree(Exchange::Shuffle) => {
                self.launch(&TreeReduce::new(&input, &sum[0], ShuffleExchange), geometry)?
            }
            ReduceKernel::Tree(Exchange::SharedMemory) => {
                self.launch(&TreeReduce::new(&input, &sum[0], SharedMemoryExchange), geometry)?
            }
        };
        Ok(Timed::new(sum.to_host()[0], elapsed))
    }

    fn matmul(
        &self,
        kernel: MatmulKernel,
        lhs: &[i32],
        rhs: &[i32],
        shape: MatmulShape,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError> {
        let lhs = self.memory.upload(lhs)?;
        let rhs = self.memory.upload(rhs)?;
        let out = self.memory.zeroed::<AtomicI32>(shape.out_len())?;

        let elapsed = match kernel {
            MatmulKernel::Naive => {
                self.launch(&NaiveMatmul::new(&lhs, &rhs, &out, shape), geometry)?
            }
            MatmulKernel::Tiled => {
                self.launch(&TiledMatmul::new(&lhs, &rhs, &out, shape), geometry)?
            }
        };
        Ok(Timed::new(out.to_host(), elapsed))
    }

    fn transpose(
        &self,
        input: &[i32],
        rows: usize,
        cols: usize,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError> {
        let input = self.memory.upload(input)?;
        let out = self.memory.zeroed::<AtomicI32>(input.len())?;
        let elapsed = self.launch(&Transpose::new(&input, &out, rows, cols), geometry)?;
        Ok(Timed::new(out.to_host(), elapsed))
    }
}
