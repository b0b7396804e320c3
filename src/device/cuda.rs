//! NVIDIA backend: launches the kernels of the `gpu` crate through `cust`.
//!
//! The PTX is built by `build.rs` with `cuda_builder` and embedded at compile time.

use std::time::Instant;

use cust::context::Context;
use cust::device::DeviceAttribute;
use cust::memory::{CopyDestination, DeviceBox, DeviceBuffer};
use cust::module::Module;
use cust::prelude::*;
use cust::stream::{Stream, StreamFlags};
use log::info;

use super::{Device, DeviceProperties, LaunchGeometry, Timed};
use crate::error::DeviceError;
use crate::matmul::{MatmulKernel, MatmulShape};
use crate::reduce::ReduceKernel;

static PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/kernels.ptx"));

pub struct CudaDevice {
    properties: DeviceProperties,
    module: Module,
    stream: Stream,
    // Dropped last: module and stream belong to this context.
    _context: Context,
}

impl CudaDevice {
    /// Opens the first CUDA device and loads the kernels.
    pub fn new() -> Result<Self, DeviceError> {
        let context = cust::quick_init()?;
        let device = cust::device::Device::get_device(0)?;
        let attribute = |attr| device.get_attribute(attr).map(|value| value as u32);
        let properties = DeviceProperties {
            name: device.name()?,
            subgroup_width: attribute(DeviceAttribute::WarpSize)?,
            max_group_size: attribute(DeviceAttribute::MaxThreadsPerBlock)?,
            max_groups: attribute(DeviceAttribute::MaxGridDimX)?
                .min(attribute(DeviceAttribute::MaxGridDimY)?),
        };
        info!(
            "opened {} (warp size {}, up to {} threads per block)",
            properties.name, properties.subgroup_width, properties.max_group_size
        );

        let module = Module::from_ptx(PTX, &[])?;
        let stream = Stream::new(StreamFlags::NON_BLOCKING, None)?;
        Ok(Self {
            properties,
            module,
            stream,
            _context: context,
        })
    }

    fn dims(geometry: &LaunchGeometry) -> (GridSize, BlockSize) {
        (
            GridSize::xy(geometry.grid.x, geometry.grid.y),
            BlockSize::xy(geometry.block.x, geometry.block.y),
        )
    }
}

impl Device for CudaDevice {
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
        geometry.validate(&self.properties)?;
        let input = DeviceBuffer::from_slice(values)?;
        let sum = DeviceBox::new(&0u64)?;
        let function = self.module.get_function(kernel.name())?;
        let (grid, block) = Self::dims(geometry);
        let stream = &self.stream;

        let start = Instant::now();
        // SAFETY: the buffers outlive the launch, which is synchronised below.
        unsafe {
            match kernel {
                ReduceKernel::Atomic => launch!(
                    function<<<grid, block, 0, stream>>>(
                        input.as_device_ptr(),
                        input.len(),
                        sum.as_device_ptr()
                    )
                )?,
                ReduceKernel::Tree(_) => launch!(
                    function<<<grid, block, 0, stream>>>(
                        input.as_device_ptr(),
                        input.len(),
                        sum.as_device_ptr(),
                        geometry.subgroup_width
                    )
                )?,
            }
        }
        self.stream.synchronize()?;
        let elapsed = start.elapsed();

        let mut host = 0u64;
        sum.copy_to(&mut host)?;
        Ok(Timed::new(host, elapsed))
    }

    fn matmul(
        &self,
        kernel: MatmulKernel,
        lhs: &[i32],
        rhs: &[i32],
        shape: MatmulShape,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError> {
        geometry.validate(&self.properties)?;
        let lhs = DeviceBuffer::from_slice(lhs)?;
        let rhs = DeviceBuffer::from_slice(rhs)?;
        let out = DeviceBuffer::from_slice(&vec![0i32; shape.out_len()])?;
        let function = self.module.get_function(kernel.name())?;
        let (grid, block) = Self::dims(geometry);
        let stream = &self.stream;

        let start = Instant::now();
        // SAFETY: the buffers outlive the launch, which is synchronised below.
        unsafe {
            launch!(
                function<<<grid, block, 0, stream>>>(
                    lhs.as_device_ptr(),
                    lhs.len(),
                    rhs.as_device_ptr(),
                    rhs.len(),
                    out.as_device_ptr(),
                    shape.m,
                    shape.n,
                    shape.k
                )
            )?;
        }
        self.stream.synchronize()?;
        let elapsed = start.elapsed();

        let mut host = vec![0i32; shape.out_len()];
        out.copy_to(&mut host[..])?;
        Ok(Timed::new(host, elapsed))
    }

    fn transpose(
        &self,
        input: &[i32],
        rows: usize,
        cols: usize,
        geometry: &LaunchGeometry,
    ) -> Result<Timed<Vec<i32>>, DeviceError> {
        geometry.validate(&self.properties)?;
        let input = DeviceBuffer::from_slice(input)?;
        let out = DeviceBuffer::from_slice(&vec![0i32; input.len()])?;
        let function = self.module.get_function("transpose")?;
        let (grid, block) = Self::dims(geometry);
        let stream = &self.stream;

        let start = Instant::now();
        // SAFETY: the buffers outlive the launch, which is synchronised below.
        unsafe {
            launch!(
                function<<<grid, block, 0, stream>>>(
                    input.as_device_ptr(),
                    input.len(),
                    out.as_device_ptr(),
                    rows,
                    cols
                )
            )?;
        }
        self.stream.synchronize()?;
        let elapsed = start.elapsed();

        let mut host = vec![0i32; rows * cols];
        out.copy_to(&mut host[..])?;
        Ok(Timed::new(host, elapsed))
    }
}
