mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use cli::{Backend, BenchArgs, Cli, Command, DeviceArgs, MatmulArgs, ReduceArgs};
use gpu_microbench::config::{parse_size, BenchConfig};
use gpu_microbench::data::{InputGenerator, InputPattern};
use gpu_microbench::harness::{render_table, run_benchmark, select_benchmarks, write_json};
use gpu_microbench::matmul::{self, MatmulShape};
use gpu_microbench::reduce::{self, ReduceOptions};
use gpu_microbench::{BenchError, Device, DeviceError, Emulator};

fn open_device(args: &DeviceArgs) -> Result<Box<dyn Device>, DeviceError> {
    for flag in args.ignored_flags() {
        warn!("{} only applies to the emulator, ignoring it", flag);
    }
    match args.backend {
        Backend::Emulator => {
            let mut builder = Emulator::builder();
            if let Some(width) = args.subgroup_width {
                builder = builder.subgroup_width(width);
            }
            if let Some(threads) = args.threads {
                builder = builder.threads(threads);
            }
            Ok(Box::new(builder.build()?))
        }
        #[cfg(feature = "cuda")]
        Backend::Cuda => Ok(Box::new(gpu_microbench::device::cuda::CudaDevice::new()?)),
        #[cfg(not(feature = "cuda"))]
        Backend::Cuda => Err(DeviceError::Initialization(
            "built without the `cuda` feature".to_string(),
        )),
    }
}

/// `Ok(false)` when the device result disagrees with the CPU.
fn run_reduce(device: &dyn Device, args: &ReduceArgs) -> Result<bool, BenchError> {
    let size = parse_size(&args.size)?;
    let pattern: InputPattern = args.pattern.parse()?;
    let values = InputGenerator::new(args.seed).bytes(pattern, size);
    let options = ReduceOptions {
        kernel: args.kernel(),
        group_size: args.group_size,
    };

    let geometry = options.geometry(values.len(), device.properties().subgroup_width)?;
    println!("Number of groups: {}", geometry.grid.x);

    let sum = reduce::reduce_sum(device, &values, &options)?;
    println!(
        "Result: {} - Time elapsed: {:.6}",
        sum.value,
        sum.elapsed.as_secs_f64()
    );
    match reduce::verify(&values, sum.value) {
        Ok(()) => Ok(true),
        Err(mismatch) => {
            eprintln!("Error: sum is not correct, should be {}", mismatch.expected);
            Ok(false)
        }
    }
}

fn run_matmul(device: &dyn Device, args: &MatmulArgs) -> Result<bool, BenchError> {
    let shape = MatmulShape::new(args.m, args.n, args.k);
    shape.validate()?;
    let mut gen = InputGenerator::new(args.seed);
    let lhs = gen.matrix(shape.m, shape.n);
    let rhs = gen.matrix(shape.n, shape.k);

    let gpu = matmul::matmul_gpu(device, &lhs, &rhs, shape, args.strategy)?;
    let gpu_ms = gpu.elapsed.as_secs_f64() * 1e3;
    println!(
        "Time elapsed on matrix multiplication of {}x{} . {}x{} on GPU: {:.6} ms.\n",
        shape.m, shape.n, shape.n, shape.k, gpu_ms
    );

    let start = std::time::Instant::now();
    let cpu = matmul::matmul_cpu(&lhs, &rhs, shape);
    let cpu_ms = start.elapsed().as_secs_f64() * 1e3;
    println!(
        "Time elapsed on matrix multiplication of {}x{} . {}x{} on CPU: {:.6} ms.\n",
        shape.m, shape.n, shape.n, shape.k, cpu_ms
    );

    match matmul::verify(&cpu, &gpu.value, shape.k) {
        Ok(()) => {
            println!("all results are correct!!!, speedup = {:.6}", cpu_ms / gpu_ms);
            Ok(true)
        }
        Err(mismatch) => {
            warn!("{}", mismatch);
            println!("incorrect results");
            Ok(false)
        }
    }
}

fn run_bench(device: &dyn Device, args: &BenchArgs) -> Result<bool, BenchError> {
    let file = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };
    let settings = file.merge(args.overrides()).resolve()?;
    info!(
        "profile {}: sizes {:?}, {} runs, {} warmup",
        settings.profile, settings.sizes, settings.runs, settings.warmup
    );

    let mut points = Vec::new();
    for mut bench in select_benchmarks(device, &settings, &settings.experiments)? {
        points.extend(run_benchmark(bench.as_mut(), &settings)?);
    }
    print!("{}", render_table(&points));

    if let Some(path) = &settings.json_file {
        write_json(path, device.properties(), &settings, &points)?;
    }
    Ok(points.iter().all(|point| point.valid))
}

fn run(cli: &Cli) -> Result<bool, BenchError> {
    let device = open_device(&cli.device)?;
    info!("running on {}", device.properties().name);
    match &cli.command {
        Command::Reduce(args) => run_reduce(device.as_ref(), args),
        Command::Matmul(args) => run_matmul(device.as_ref(), args),
        Command::Bench(args) => run_bench(device.as_ref(), args),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
