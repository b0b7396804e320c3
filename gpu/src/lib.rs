#![cfg_attr(
    target_os = "cuda",
    no_std,
    feature(register_attr, asm_experimental_arch),
    register_attr(nvvm_internal)
)]
#![allow(improper_ctypes_definitions, clippy::missing_safety_doc)]

use core::arch::asm;

use cuda_std::prelude::*;
use cuda_std::shared_array;
use cuda_std::thread::{
    block_dim_x, block_dim_y, block_idx_x, block_idx_y, sync_threads, thread_idx_x, thread_idx_y,
};

const TILE: usize = 16;
const MAX_GROUP_SIZE: usize = 1024;
const MAX_SUBGROUPS: usize = 32;

#[inline(always)]
unsafe fn atomic_add_u64(address: *mut u64, value: u64) {
    asm!(
        "red.global.add.u64 [{}], {};",
        in(reg64) address as u64,
        in(reg64) value,
    );
}

/// `__shfl_down_sync` over `width`-lane segments of the full warp.
#[inline(always)]
unsafe fn shuffle_down(value: u32, delta: u32, width: u32) -> u32 {
    let clamp = ((32 - width) << 8) | 0x1f;
    let out: u32;
    asm!(
        "shfl.sync.down.b32 {}, {}, {}, {}, 0xffffffff;",
        out(reg32) out,
        in(reg32) value,
        in(reg32) delta,
        in(reg32) clamp,
    );
    out
}

#[inline(always)]
unsafe fn warp_reduce(mut value: u32, width: u32) -> u32 {
    let mut offset = width / 2;
    while offset > 0 {
        value += shuffle_down(value, offset, width);
        offset /= 2;
    }
    value
}

/// Every lane of the block must call this: it contains barriers.
#[inline(always)]
unsafe fn shared_reduce(scratch: *mut u32, tid: usize, value: u32, width: u32) -> u32 {
    let lane = tid as u32 % width;
    *scratch.add(tid) = value;
    sync_threads();
    let mut offset = width / 2;
    while offset > 0 {
        if lane < offset {
            *scratch.add(tid) += *scratch.add(tid + offset as usize);
        }
        sync_threads();
        offset /= 2;
    }
    *scratch.add(tid)
}

#[inline(always)]
fn load_or_zero(values: &[u8]) -> u32 {
    let idx = (block_idx_x() * block_dim_x() + thread_idx_x()) as usize;
    if idx < values.len() {
        values[idx] as u32
    } else {
        0
    }
}

#[kernel]
pub unsafe fn reduce_atomic(values: &[u8], sum: *mut u64) {
    let idx = thread::index_1d() as usize;
    if idx < values.len() {
        atomic_add_u64(sum, values[idx] as u64);
    }
}

#[kernel]
pub unsafe fn reduce_shuffle(values: &[u8], sum: *mut u64, width: u32) {
    let tid = thread_idx_x();
    let lane = tid % width;
    let subgroup = tid / width;
    let subgroups = (block_dim_x() + width - 1) / width;
    let partials = shared_array![u32; MAX_SUBGROUPS];

    let value = warp_reduce(load_or_zero(values), width);
    if lane == 0 {
        *partials.add(subgroup as usize) = value;
    }
    sync_threads();

    if subgroup == 0 {
        let partial = if lane < subgroups {
            *partials.add(lane as usize)
        } else {
            0
        };
        let total = warp_reduce(partial, width);
        if lane == 0 {
            atomic_add_u64(sum, total as u64);
        }
    }
}

#[kernel]
pub unsafe fn reduce_shared(values: &[u8], sum: *mut u64, width: u32) {
    let tid = thread_idx_x();
    let lane = tid % width;
    let subgroup = tid / width;
    let subgroups = (block_dim_x() + width - 1) / width;
    let scratch = shared_array![u32; MAX_GROUP_SIZE];
    let partials = shared_array![u32; MAX_SUBGROUPS];

    let value = shared_reduce(scratch, tid as usize, load_or_zero(values), width);
    if lane == 0 {
        *partials.add(subgroup as usize) = value;
    }
    sync_threads();

    let partial = if subgroup == 0 && lane < subgroups {
        *partials.add(lane as usize)
    } else {
        0
    };
    let total = shared_reduce(scratch, tid as usize, partial, width);
    if tid == 0 {
        atomic_add_u64(sum, total as u64);
    }
}

#[kernel]
pub unsafe fn matmul(a: &[i32], b: &[i32], out: *mut i32, m: usize, n: usize, k: usize) {
    let row = (block_idx_y() * block_dim_y() + thread_idx_y()) as usize;
    let col = (block_idx_x() * block_dim_x() + thread_idx_x()) as usize;
    if row < m && col < k {
        let mut sum = 0i32;
        for i in 0..n {
            sum = sum.wrapping_add(a[row * n + i].wrapping_mul(b[i * k + col]));
        }
        *out.add(row * k + col) = sum;
    }
}

#[kernel]
pub unsafe fn matmul_tiled(a: &[i32], b: &[i32], out: *mut i32, m: usize, n: usize, k: usize) {
    let row = (block_idx_y() * block_dim_y() + thread_idx_y()) as usize;
    let col = (block_idx_x() * block_dim_x() + thread_idx_x()) as usize;
    let ty = thread_idx_y() as usize;
    let tx = thread_idx_x() as usize;

    let tile_a = shared_array![i32; TILE * TILE];
    let tile_b = shared_array![i32; TILE * TILE];

    let mut sum = 0i32;
    for step in 0..(n + TILE - 1) / TILE {
        *tile_a.add(ty * TILE + tx) = if row < m && step * TILE + tx < n {
            a[row * n + step * TILE + tx]
        } else {
            0
        };
        *tile_b.add(ty * TILE + tx) = if step * TILE + ty < n && col < k {
            b[(step * TILE + ty) * k + col]
        } else {
            0
        };

        sync_threads();
        for j in 0..TILE {
            sum = sum.wrapping_add((*tile_a.add(ty * TILE + j)).wrapping_mul(*tile_b.add(j * TILE + tx)));
        }
        sync_threads();
    }
    if row < m && col < k {
        *out.add(row * k + col) = sum;
    }
}

#[kernel]
pub unsafe fn transpose(input: &[i32], out: *mut i32, rows: usize, cols: usize) {
    let row = (block_idx_y() * block_dim_y() + thread_idx_y()) as usize;
    let col = (block_idx_x() * block_dim_x() + thread_idx_x()) as usize;
    if row < rows && col < cols {
        *out.add(col * rows + row) = input[row * cols + col];
    }
}
