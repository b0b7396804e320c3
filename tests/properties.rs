//! Property tests: every kernel agrees with the sequential reference for
//! arbitrary inputs and launch shapes.
//!
//! One emulator per width is shared across cases.

use gpu_microbench::matmul::{matmul_cpu, matmul_gpu, MatmulShape, MatmulStrategy};
use gpu_microbench::reduce::{reduce_cpu, reduce_sum, Exchange, ReduceKernel, ReduceOptions};
use gpu_microbench::Emulator;

use proptest::prelude::*;
use proptest::sample::select;
use std::sync::OnceLock;

fn emulator(width: u32) -> &'static Emulator {
    static NARROW: OnceLock<Emulator> = OnceLock::new();
    static WIDE: OnceLock<Emulator> = OnceLock::new();
    let cell = if width == 64 { &WIDE } else { &NARROW };
    cell.get_or_init(|| Emulator::builder().subgroup_width(width).build().unwrap())
}

fn kernels() -> impl Strategy<Value = ReduceKernel> {
    select(vec![
        ReduceKernel::Atomic,
        ReduceKernel::Tree(Exchange::Shuffle),
        ReduceKernel::Tree(Exchange::SharedMemory),
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reduce_equals_sequential_sum(
        values in prop::collection::vec(any::<u8>(), 0..6000),
        kernel in kernels(),
        width in select(vec![32u32, 64]),
        group_size in select(vec![64u32, 128, 256, 512, 1024]),
    ) {
        let options = ReduceOptions { kernel, group_size };
        let sum = reduce_sum(emulator(width), &values, &options).unwrap();
        prop_assert_eq!(sum.value, reduce_cpu(&values));
    }

    #[test]
    fn order_does_not_matter(values in prop::collection::vec(any::<u8>(), 1..3000)) {
        let options = ReduceOptions::default();
        let mut reversed = values.clone();
        reversed.reverse();
        let forward = reduce_sum(emulator(32), &values, &options).unwrap().value;
        let backward = reduce_sum(emulator(32), &reversed, &options).unwrap().value;
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn saturated_bytes_never_overflow(len in 0usize..20_000) {
        let values = vec![u8::MAX; len];
        let sum = reduce_sum(emulator(32), &values, &ReduceOptions::default()).unwrap();
        prop_assert_eq!(sum.value, 255 * len as u64);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tiled_and_naive_matmul_match_cpu(
        m in 1usize..40,
        n in 0usize..40,
        k in 1usize..40,
        seed in any::<u64>(),
    ) {
        let shape = MatmulShape::new(m, n, k);
        let mut gen = gpu_microbench::data::InputGenerator::new(seed);
        let lhs = gen.matrix(m, n);
        let rhs = gen.matrix(n, k);
        let expected = matmul_cpu(&lhs, &rhs, shape);
        for strategy in [MatmulStrategy::Naive, MatmulStrategy::Tiled] {
            let actual = matmul_gpu(emulator(32), &lhs, &rhs, shape, strategy).unwrap();
            prop_assert_eq!(&actual.value, &expected);
        }
    }
}
