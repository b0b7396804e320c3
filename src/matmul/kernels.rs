use std::sync::atomic::{AtomicI32, Ordering};

use crate::device::{GroupContext, GroupKernel};

use super::MatmulShape;

pub struct NaiveMatmul<'a> {
    lhs: &'a [i32],
    rhs: &'a [i32],
    out: &'a [AtomicI32],
    shape: MatmulShape,
}

impl<'a> NaiveMatmul<'a> {
    pub fn new(lhs: &'a [i32], rhs: &'a [i32], out: &'a [AtomicI32], shape: MatmulShape) -> Self {
        Self {
            lhs,
            rhs,
            out,
            shape,
        }
    }
}

impl GroupKernel for NaiveMatmul<'_> {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn run(&self, group: &mut GroupContext<'_>) {
        let MatmulShape { m, n, k } = self.shape;
        for lane in 0..group.lanes() {
            let pos = group.global_xy(lane);
            let (row, col) = (pos.y as usize, pos.x as usize);
            if row < m && col < k {
                let mut sum = 0i32;
                for i in 0..n {
                    sum = sum.wrapping_add(self.lhs[row * n + i].wrapping_mul(self.rhs[i * k + col]));
                }
                self.out[row * k + col].store(sum, Ordering::Relaxed);
            }
        }
    }
}

/// Square groups walk the shared dimension one tile at a time, staging a
/// tile of A and a tile of B in shared memory; cells outside the matrices
/// are staged as zero.
pub struct TiledMatmul<'a> {
    lhs: &'a [i32],
    rhs: &'a [i32],
    out: &'a [AtomicI32],
    shape: MatmulShape,
}

impl<'a> TiledMatmul<'a> {
    pub fn new(lhs: &'a [i32], rhs: &'a [i32], out: &'a [AtomicI32], shape: MatmulShape) -> Self {
        Self {
            lhs,
            rhs,
            out,
            shape,
        }
    }
}

impl GroupKernel for TiledMatmul<'_> {
    fn name(&self) -> &'static str {
        "matmul_tiled"
    }

    fn run(&self, group: &mut GroupContext<'_>) {
        let MatmulShape { m, n, k } = self.shape;
        let tile = group.block_dim().x as usize;
        let lanes = group.lanes();
        let tile_a = group.alloc_shared(tile * tile);
        let tile_b = group.alloc_shared(tile * tile);
        let mut sums = vec![0i32; lanes as usize];

        for step in 0..n.div_ceil(tile) {
            for lane in 0..lanes {
                let thread = group.thread_idx(lane);
                let pos = group.global_xy(lane);
                let (tx, ty) = (thread.x as usize, thread.y as usize);
                let (row, col) = (pos.y as usize, pos.x as usize);

                let a_col = step * tile + tx;
                let a = if row < m && a_col < n { self.lhs[row * n + a_col] } else { 0 };
                let b_row = step * tile + ty;
                let b = if b_row < n && col < k { self.rhs[b_row * k + col] } else { 0 };
                group.store(tile_a, ty * tile + tx, a as u32);
                group.store(tile_b, ty * tile + tx, b as u32);
            }
            group.sync_threads();

            for (lane, sum) in sums.iter_mut().enumerate() {
                let thread = group.thread_idx(lane as u32);
                let (tx, ty) = (thread.x as usize, thread.y as usize);
                for j in 0..tile {
                    let a = group.load(tile_a, ty * tile + j) as i32;
                    let b = group.load(tile_b, j * tile + tx) as i32;
                    *sum = sum.wrapping_add(a.wrapping_mul(b));
                }
            }
            group.sync_threads();
        }

        for (lane, &sum) in sums.iter().enumerate() {
            let pos = group.global_xy(lane as u32);
            let (row, col) = (pos.y as usize, pos.x as usize);
            if row < m && col < k {
                self.out[row * k + col].store(sum, Ordering::Relaxed);
            }
        }
    }
}

pub struct Transpose<'a> {
    input: &'a [i32],
    out: &'a [AtomicI32],
    rows: usize,
    cols: usize,
}

impl<'a> Transpose<'a> {
    pub fn new(input: &'a [i32], out: &'a [AtomicI32], rows: usize, cols: usize) -> Self {
        Self {
            input,
            out,
            rows,
            cols,
        }
    }
}

impl GroupKernel for Transpose<'_> {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn run(&self, group: &mut GroupContext<'_>) {
        for lane in 0..group.lanes() {
            let pos = group.global_xy(lane);
            let (row, col) = (pos.y as usize, pos.x as usize);
            if row < self.rows && col < self.cols {
                let value = self.input[row * self.cols + col];
                self.out[col * self.rows + row].store(value, Ordering::Relaxed);
            }
        }
    }
}
