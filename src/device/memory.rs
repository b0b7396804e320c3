use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use crate::error::DeviceError;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    in_use: AtomicUsize,
    limit: Option<usize>,
}

impl MemoryLedger {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            in_use: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn upload<T: Copy>(&self, host: &[T]) -> Result<DeviceBuffer<'_, T>, DeviceError> {
        let mut buffer = self.allocate::<T>(host.len())?;
        buffer.data.extend_from_slice(host);
        Ok(buffer)
    }

    /// Allocates `len` default-initialised elements (zero for atomics).
    pub fn zeroed<T: Default>(&self, len: usize) -> Result<DeviceBuffer<'_, T>, DeviceError> {
        let mut buffer = self.allocate::<T>(len)?;
        buffer.data.extend((0..len).map(|_| T::default()));
        Ok(buffer)
    }

    fn allocate<T>(&self, len: usize) -> Result<DeviceBuffer<'_, T>, DeviceError> {
        let bytes = len.checked_mul(mem::size_of::<T>()).ok_or_else(|| {
            DeviceError::Allocation(format!("{} elements overflow the address space", len))
        })?;
        self.reserve(bytes)?;
        // The guard owns the reservation from here on, including on the error path below.
        let mut buffer = DeviceBuffer {
            data: Vec::new(),
            bytes,
            ledger: self,
        };
        buffer
            .data
            .try_reserve_exact(len)
            .map_err(|err| DeviceError::Allocation(format!("{} bytes: {}", bytes, err)))?;
        Ok(buffer)
    }

    fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(bytes)?;
                match self.limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .map(|_| ())
            .map_err(|current| {
                DeviceError::Allocation(format!(
                    "{} bytes requested, {} of {} bytes already in use",
                    bytes,
                    current,
                    self.limit.map_or_else(|| "unlimited".to_string(), |l| l.to_string())
                ))
            })
    }

    fn release(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// An allocation in device memory; released when dropped.
#[derive(Debug)]
pub struct DeviceBuffer<'d, T> {
    data: Vec<T>,
    bytes: usize,
    ledger: &'d MemoryLedger,
}

impl<T> Deref for DeviceBuffer<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> Drop for DeviceBuffer<'_, T> {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
    }
}

impl DeviceBuffer<'_, AtomicU64> {
    pub fn to_host(&self) -> Vec<u64> {
        self.data.iter().map(|cell| cell.load(Ordering::Acquire)).collect()
    }
}

impl DeviceBuffer<'_, AtomicI32> {
    pub fn to_host(&self) -> Vec<i32> {
        self.data.iter().map(|cell| cell.load(Ordering::Acquire)).collect()
    }
}
