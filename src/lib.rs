//! GPU micro-benchmarks.
//!
//! Two workloads are provided, each with a CPU reference to validate against:
//!
//! * [`reduce`]: sum of `u8` values into a `u64`, either with one atomic per
//!   element or with the two-phase sub-group tree reduction (one atomic per
//!   group).
//! * [`matmul`]: `i32` matrix multiplication, naive and shared-memory tiled,
//!   plus a transpose kernel.
//!
//! Kernels run on any [`Device`](device::Device). The [`Emulator`](device::Emulator)
//! executes groups, sub-groups and lanes on the host thread pool and is always
//! available; an NVIDIA backend is compiled in with the `cuda` feature.

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod harness;
pub mod matmul;
pub mod reduce;
pub mod stats;

pub use device::{Device, Emulator};
pub use error::{BenchError, DeviceError, Mismatch};
pub use reduce::{reduce_sum, ReduceKernel, ReduceOptions};
