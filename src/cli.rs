use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use gpu_microbench::config::BenchConfig;
use gpu_microbench::matmul::MatmulStrategy;
use gpu_microbench::reduce::{Exchange, DEFAULT_GROUP_SIZE};
use gpu_microbench::ReduceKernel;

/// GPU micro-benchmarks: sub-group tree reduction and tiled matrix multiplication
#[derive(Parser, Debug)]
#[command(name = "gpu-microbench", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Where kernels run
    #[arg(long, value_enum, global = true, default_value_t = Backend::Emulator)]
    pub backend: Backend,

    /// Sub-group (warp) width of the emulated device (default: 32)
    #[arg(long, global = true)]
    pub subgroup_width: Option<u32>,

    /// Worker threads of the emulated device (default: all cores)
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

impl DeviceArgs {
    /// Emulator flags given alongside a backend that ignores them.
    pub fn ignored_flags(&self) -> Vec<&'static str> {
        if self.backend == Backend::Emulator {
            return Vec::new();
        }
        let mut flags = Vec::new();
        if self.subgroup_width.is_some() {
            flags.push("--subgroup-width");
        }
        if self.threads.is_some() {
            flags.push("--threads");
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Emulator,
    Cuda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KernelArg {
    /// Two-phase sub-group tree reduction
    Tree,
    /// One atomic add per element
    Atomic,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sum a vector of bytes on the device and check it against the CPU
    Reduce(ReduceArgs),
    /// Multiply an m x n by an n x k integer matrix and compare with the CPU
    Matmul(MatmulArgs),
    /// Run the benchmark suite
    Bench(BenchArgs),
}

#[derive(Args, Debug)]
pub struct ReduceArgs {
    /// Number of elements (e.g. 1M, 100K, 1_000_000)
    #[arg(long, default_value = "1M")]
    pub size: String,

    #[arg(long, value_enum, default_value_t = KernelArg::Tree)]
    pub kernel: KernelArg,

    /// Exchange primitive of the tree kernel
    #[arg(long, value_enum, default_value_t = Exchange::Shuffle)]
    pub exchange: Exchange,

    /// Lanes per group
    #[arg(long, default_value_t = DEFAULT_GROUP_SIZE)]
    pub group_size: u32,

    /// Input pattern: ramp, random or a constant byte
    #[arg(long, default_value = "ramp")]
    pub pattern: String,

    #[arg(long, default_value_t = gpu_microbench::data::DEFAULT_SEED)]
    pub seed: u64,
}

impl ReduceArgs {
    pub fn kernel(&self) -> ReduceKernel {
        match self.kernel {
            KernelArg::Atomic => ReduceKernel::Atomic,
            KernelArg::Tree => ReduceKernel::Tree(self.exchange),
        }
    }
}

#[derive(Args, Debug)]
pub struct MatmulArgs {
    /// Rows of A and C
    pub m: usize,
    /// Columns of A, rows of B
    pub n: usize,
    /// Columns of B and C
    pub k: usize,

    #[arg(long, value_enum, default_value_t = MatmulStrategy::Auto)]
    pub strategy: MatmulStrategy,

    #[arg(long, default_value_t = gpu_microbench::data::DEFAULT_SEED)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Experiments to run (reduce_atomic, reduce_shuffle, reduce_shared,
    /// matmul, or `reduce` for all reductions); all when omitted
    #[arg(value_name = "EXPERIMENTS")]
    pub experiments: Vec<String>,

    /// Profile: quick (1M/3/1), standard (1M+10M/10/3), thorough (1M+10M+100M/30/3)
    #[arg(long)]
    pub profile: Option<String>,

    /// Element counts to benchmark (e.g. 1M,10M,100K)
    #[arg(long, value_delimiter = ',')]
    pub sizes: Option<Vec<String>>,

    /// Measured runs per size
    #[arg(long)]
    pub runs: Option<u32>,

    /// Warmup runs before measuring
    #[arg(long)]
    pub warmup: Option<u32>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub group_size: Option<u32>,

    #[arg(long)]
    pub pattern: Option<String>,

    /// Write JSON results to this file
    #[arg(long)]
    pub json_file: Option<PathBuf>,

    /// TOML file with defaults for any of the options above
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl BenchArgs {
    /// The options given on the command line, as the top configuration layer.
    pub fn overrides(&self) -> BenchConfig {
        BenchConfig {
            profile: self.profile.clone(),
            experiments: (!self.experiments.is_empty()).then(|| self.experiments.clone()),
            sizes: self.sizes.clone(),
            runs: self.runs,
            warmup: self.warmup,
            seed: self.seed,
            group_size: self.group_size,
            pattern: self.pattern.clone(),
            json_file: self.json_file.clone(),
        }
    }
}
