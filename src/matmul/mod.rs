//! Integer matrix multiplication `C = A * B` with `A: m x n`, `B: n x k`,
//! all row-major, plus a matrix transpose.
//!
//! Arithmetic wraps on overflow, on the device and in the CPU reference alike.

pub mod kernels;

use std::mem;

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::device::{Device, LaunchGeometry, Timed};
use crate::error::{DeviceError, Mismatch};

/// Edge of the square lane groups, and of the shared tiles of the tiled kernel.
pub const TILE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulShape {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    pub fn square(n: usize) -> Self {
        Self::new(n, n, n)
    }

    pub fn is_square(&self) -> bool {
        self.m == self.n && self.n == self.k
    }

    /// Rejects shapes whose matrices could not be held in memory.
    pub fn validate(&self) -> Result<(), DeviceError> {
        matrix_len("A", self.m, self.n)?;
        matrix_len("B", self.n, self.k)?;
        matrix_len("C", self.m, self.k)?;
        Ok(())
    }

    // Saturating: a shape that passed `validate` never saturates, and one
    // that did not can never match an input length.
    pub fn lhs_len(&self) -> usize {
        self.m.saturating_mul(self.n)
    }

    pub fn rhs_len(&self) -> usize {
        self.n.saturating_mul(self.k)
    }

    pub fn out_len(&self) -> usize {
        self.m.saturating_mul(self.k)
    }
}

/// Element count of a `rows x cols` matrix of `i32`, if it fits in a host allocation.
pub fn matrix_len(what: &str, rows: usize, cols: usize) -> Result<usize, DeviceError> {
    rows.checked_mul(cols)
        .filter(|len| {
            len.checked_mul(mem::size_of::<i32>())
                .is_some_and(|bytes| bytes <= isize::MAX as usize)
        })
        .ok_or_else(|| {
            DeviceError::InvalidConfiguration(format!(
                "{} of {}x{} is too large to allocate",
                what, rows, cols
            ))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatmulStrategy {
    /// Tiled for square inputs, naive otherwise.
    Auto,
    Naive,
    Tiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatmulKernel {
    /// One lane per output cell reading A and B from global memory.
    Naive,
    /// Lanes stage `TILE x TILE` blocks of A and B in shared memory.
    Tiled,
}

impl MatmulKernel {
    pub fn name(&self) -> &'static str {
        match self {
            MatmulKernel::Naive => "matmul",
            MatmulKernel::Tiled => "matmul_tiled",
        }
    }
}

impl MatmulStrategy {
    pub fn resolve(self, shape: MatmulShape) -> MatmulKernel {
        match self {
            MatmulStrategy::Auto if shape.is_square() => MatmulKernel::Tiled,
            MatmulStrategy::Auto | MatmulStrategy::Naive => MatmulKernel::Naive,
            MatmulStrategy::Tiled => MatmulKernel::Tiled,
        }
    }
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), DeviceError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DeviceError::InvalidConfiguration(format!(
            "{} holds {} elements, the shape needs {}",
            what, actual, expected
        )))
    }
}

/// Multiplies `lhs` by `rhs` on `device`.
pub fn matmul_gpu<D: Device + ?Sized>(
    device: &D,
    lhs: &[i32],
    rhs: &[i32],
    shape: MatmulShape,
    strategy: MatmulStrategy,
) -> Result<Timed<Vec<i32>>, DeviceError> {
    shape.validate()?;
    check_len("lhs", lhs.len(), shape.lhs_len())?;
    check_len("rhs", rhs.len(), shape.rhs_len())?;
    if shape.out_len() == 0 {
        return Ok(Timed::immediate(Vec::new()));
    }
    let kernel = strategy.resolve(shape);
    let geometry =
        LaunchGeometry::tiled(shape.m, shape.k, TILE, device.properties().subgroup_width)?;
    debug!(
        "{} for {}x{} . {}x{}: grid {}x{}",
        kernel.name(),
        shape.m,
        shape.n,
        shape.n,
        shape.k,
        geometry.grid.x,
        geometry.grid.y
    );
    device.matmul(kernel, lhs, rhs, shape, &geometry)
}

/// Transposes a `rows x cols` matrix on `device`.
pub fn transpose_gpu<D: Device + ?Sized>(
    device: &D,
    input: &[i32],
    rows: usize,
    cols: usize,
) -> Result<Timed<Vec<i32>>, DeviceError> {
    check_len("input", input.len(), matrix_len("input", rows, cols)?)?;
    if input.is_empty() {
        return Ok(Timed::immediate(Vec::new()));
    }
    let geometry = LaunchGeometry::tiled(rows, cols, TILE, device.properties().subgroup_width)?;
    device.transpose(input, rows, cols, &geometry)
}

/// Host reference, one row of `C` per rayon task.
pub fn matmul_cpu(lhs: &[i32], rhs: &[i32], shape: MatmulShape) -> Vec<i32> {
    let MatmulShape { n, k, .. } = shape;
    let mut out = vec![0i32; shape.out_len()];
    if k == 0 {
        return out;
    }
    out.par_chunks_mut(k).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..n).fold(0i32, |acc, h| {
                acc.wrapping_add(lhs[i * n + h].wrapping_mul(rhs[h * k + j]))
            });
        }
    });
    out
}

pub fn transpose_cpu(input: &[i32], rows: usize, cols: usize) -> Vec<i32> {
    let mut out = vec![0i32; input.len()];
    for row in 0..rows {
        for col in 0..cols {
            out[col * rows + row] = input[row * cols + col];
        }
    }
    out
}

/// Compares every cell of a `rows x cols` device result with the reference.
pub fn verify(expected: &[i32], actual: &[i32], cols: usize) -> Result<(), Mismatch> {
    if expected.len() != actual.len() {
        return Err(Mismatch::new(
            "result length",
            expected.len(),
            actual.len(),
        ));
    }
    match expected.iter().zip(actual).position(|(e, a)| e != a) {
        None => Ok(()),
        Some(index) => {
            let (row, col) = if cols == 0 { (index, 0) } else { (index / cols, index % cols) };
            Err(Mismatch::new(
                format!("C[{}][{}]", row, col),
                expected[index],
                actual[index],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_reference_small() {
        // [1 2 3]   [7  8 ]   [ 58  64]
        // [4 5 6] x [9  10] = [139 154]
        //           [11 12]
        let lhs = [1, 2, 3, 4, 5, 6];
        let rhs = [7, 8, 9, 10, 11, 12];
        let out = matmul_cpu(&lhs, &rhs, MatmulShape::new(2, 3, 2));
        assert_eq!(out, vec![58, 64, 139, 154]);
    }

    #[test]
    fn cpu_reference_wraps() {
        let out = matmul_cpu(&[i32::MAX, 2], &[2, 1], MatmulShape::new(1, 2, 1));
        assert_eq!(out, vec![i32::MAX.wrapping_mul(2).wrapping_add(2)]);
    }

    #[test]
    fn transpose_cpu_swaps_axes() {
        assert_eq!(transpose_cpu(&[1, 2, 3, 4, 5, 6], 2, 3), vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn auto_strategy_prefers_tiles_for_square_inputs() {
        assert_eq!(MatmulStrategy::Auto.resolve(MatmulShape::square(64)), MatmulKernel::Tiled);
        assert_eq!(
            MatmulStrategy::Auto.resolve(MatmulShape::new(64, 32, 16)),
            MatmulKernel::Naive
        );
        assert_eq!(
            MatmulStrategy::Tiled.resolve(MatmulShape::new(64, 32, 16)),
            MatmulKernel::Tiled
        );
    }

    #[test]
    fn verify_locates_first_bad_cell() {
        let err = verify(&[1, 2, 3, 4], &[1, 2, 3, 5], 2).unwrap_err();
        assert_eq!(err.what, "C[1][1]");
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        for shape in [
            MatmulShape::new(usize::MAX, 2, 1),
            MatmulShape::new(1, 2, usize::MAX),
            MatmulShape::new(1 << 32, 1 << 32, 1),
            MatmulShape::new(1 << 31, 1, 1 << 31),
        ] {
            assert!(
                matches!(shape.validate(), Err(DeviceError::InvalidConfiguration(_))),
                "{shape:?}"
            );
        }
        assert_eq!(MatmulShape::new(usize::MAX, 2, 1).lhs_len(), usize::MAX);
        assert!(MatmulShape::new(4096, 100, 4096).validate().is_ok());
    }

    #[test]
    fn verify_accepts_equal_results() {
        assert!(verify(&[1, 2], &[1, 2], 2).is_ok());
    }
}
