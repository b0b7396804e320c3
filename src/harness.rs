use std::fs;
use std::path::Path;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{format_size, BenchSettings};
use crate::data::{InputGenerator, InputPattern};
use crate::device::{Device, DeviceProperties};
use crate::error::{BenchError, ConfigError, DeviceError, Mismatch};
use crate::matmul::{self, MatmulShape, MatmulStrategy};
use crate::reduce::{self, Exchange, ReduceKernel, ReduceOptions};
use crate::stats::{compute_stats, Stats};

/// A workload with a device implementation and a CPU reference.
pub trait Benchmark {
    fn name(&self) -> &'static str;

    fn setup(&mut self, size: usize, gen: &mut InputGenerator) -> Result<(), DeviceError>;

    /// Runs on the device; returns the kernel time in milliseconds.
    fn run_device(&mut self) -> Result<f64, DeviceError>;

    fn run_cpu(&mut self) -> f64;

    fn validate(&self) -> Result<(), Mismatch>;
}

pub struct ReduceBenchmark<'d, D: ?Sized> {
    device: &'d D,
    options: ReduceOptions,
    pattern: InputPattern,
    values: Vec<u8>,
    device_sum: Option<u64>,
    cpu_sum: Option<u64>,
}

impl<'d, D: Device + ?Sized> ReduceBenchmark<'d, D> {
    pub fn new(device: &'d D, options: ReduceOptions, pattern: InputPattern) -> Self {
        Self {
            device,
            options,
            pattern,
            values: Vec::new(),
            device_sum: None,
            cpu_sum: None,
        }
    }
}

impl<D: Device + ?Sized> Benchmark for ReduceBenchmark<'_, D> {
    fn name(&self) -> &'static str {
        self.options.kernel.name()
    }

    fn setup(&mut self, size: usize, gen: &mut InputGenerator) -> Result<(), DeviceError> {
        self.values = gen.bytes(self.pattern, size);
        self.device_sum = None;
        self.cpu_sum = None;
        Ok(())
    }

    fn run_device(&mut self) -> Result<f64, DeviceError> {
        let timed = reduce::reduce_sum(self.device, &self.values, &self.options)?;
        self.device_sum = Some(timed.value);
        Ok(timed.elapsed.as_secs_f64() * 1e3)
    }

    fn run_cpu(&mut self) -> f64 {
        let start = Instant::now();
        self.cpu_sum = Some(reduce::reduce_cpu(&self.values));
        start.elapsed().as_secs_f64() * 1e3
    }

    fn validate(&self) -> Result<(), Mismatch> {
        match (self.cpu_sum, self.device_sum) {
            (Some(expected), Some(actual)) if expected == actual => Ok(()),
            (expected, actual) => Err(Mismatch::new(
                "sum",
                display_or_missing(expected),
                display_or_missing(actual),
            )),
        }
    }
}

fn display_or_missing(value: Option<u64>) -> String {
    value.map_or_else(|| "nothing".to_string(), |v| v.to_string())
}

/// Square matrix multiplication; a size of `s` elements runs `sqrt(s) x sqrt(s)` matrices.
pub struct MatmulBenchmark<'d, D: ?Sized> {
    device: &'d D,
    strategy: MatmulStrategy,
    shape: MatmulShape,
    lhs: Vec<i32>,
    rhs: Vec<i32>,
    device_out: Vec<i32>,
    cpu_out: Vec<i32>,
}

impl<'d, D: Device + ?Sized> MatmulBenchmark<'d, D> {
    pub fn new(device: &'d D, strategy: MatmulStrategy) -> Self {
        Self {
            device,
            strategy,
            shape: MatmulShape::square(0),
            lhs: Vec::new(),
            rhs: Vec::new(),
            device_out: Vec::new(),
            cpu_out: Vec::new(),
        }
    }
}

impl<D: Device + ?Sized> Benchmark for MatmulBenchmark<'_, D> {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn setup(&mut self, size: usize, gen: &mut InputGenerator) -> Result<(), DeviceError> {
        let n = (size as f64).sqrt().round() as usize;
        self.shape = MatmulShape::square(n.max(1));
        self.shape.validate()?;
        self.lhs = gen.matrix(self.shape.m, self.shape.n);
        self.rhs = gen.matrix(self.shape.n, self.shape.k);
        self.device_out.clear();
        self.cpu_out.clear();
        Ok(())
    }

    fn run_device(&mut self) -> Result<f64, DeviceError> {
        let timed = matmul::matmul_gpu(self.device, &self.lhs, &self.rhs, self.shape, self.strategy)?;
        self.device_out = timed.value;
        Ok(timed.elapsed.as_secs_f64() * 1e3)
    }

    fn run_cpu(&mut self) -> f64 {
        let start = Instant::now();
        self.cpu_out = matmul::matmul_cpu(&self.lhs, &self.rhs, self.shape);
        start.elapsed().as_secs_f64() * 1e3
    }

    fn validate(&self) -> Result<(), Mismatch> {
        matmul::verify(&self.cpu_out, &self.device_out, self.shape.k)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub experiment: String,
    pub size: usize,
    pub device_stats: Stats,
    pub cpu_stats: Stats,
    pub speedup: f64,
    /// Whether the validated run matched the CPU reference.
    pub valid: bool,
}

/// Runs `bench` at every configured size.
///
/// A mismatch in the validated run is logged and recorded in the data point;
/// device errors abort the run.
pub fn run_benchmark(
    bench: &mut dyn Benchmark,
    settings: &BenchSettings,
) -> Result<Vec<DataPoint>, DeviceError> {
    let mut results = Vec::with_capacity(settings.sizes.len());
    let mut gen = InputGenerator::new(settings.seed);

    for &size in &settings.sizes {
        let label = format_size(size);
        info!("{} @ {}: setup", bench.name(), label);
        bench.setup(size, &mut gen)?;

        bench.run_device()?;
        bench.run_cpu();
        let valid = match bench.validate() {
            Ok(()) => true,
            Err(mismatch) => {
                warn!("{} @ {} validation failed: {}", bench.name(), label, mismatch);
                false
            }
        };

        for _ in 0..settings.warmup {
            bench.run_device()?;
        }
        info!("{} @ {}: measuring ({} runs)", bench.name(), label, settings.runs);
        let device_times = (0..settings.runs)
            .map(|_| bench.run_device())
            .collect::<Result<Vec<_>, _>>()?;
        let cpu_times: Vec<f64> = (0..settings.runs).map(|_| bench.run_cpu()).collect();

        let device_stats = compute_stats(&device_times);
        let cpu_stats = compute_stats(&cpu_times);
        let speedup = if device_stats.mean > 0.0 {
            cpu_stats.mean / device_stats.mean
        } else {
            0.0
        };
        info!("{} @ {}: done (speedup {:.2}x)", bench.name(), label, speedup);

        results.push(DataPoint {
            experiment: bench.name().to_string(),
            size,
            device_stats,
            cpu_stats,
            speedup,
            valid,
        });
    }

    Ok(results)
}

pub fn all_benchmarks<'d, D: Device + ?Sized>(
    device: &'d D,
    settings: &BenchSettings,
) -> Vec<Box<dyn Benchmark + 'd>> {
    let reduction = |kernel| {
        let options = ReduceOptions {
            kernel,
            group_size: settings.group_size,
        };
        Box::new(ReduceBenchmark::new(device, options, settings.pattern)) as Box<dyn Benchmark + 'd>
    };
    vec![
        reduction(ReduceKernel::Atomic),
        reduction(ReduceKernel::Tree(Exchange::Shuffle)),
        reduction(ReduceKernel::Tree(Exchange::SharedMemory)),
        Box::new(MatmulBenchmark::new(device, MatmulStrategy::Auto)),
    ]
}

/// Picks the benchmarks named in `names`; empty or `all` selects everything.
///
/// `reduce` selects every reduction kernel.
pub fn select_benchmarks<'d, D: Device + ?Sized>(
    device: &'d D,
    settings: &BenchSettings,
    names: &[String],
) -> Result<Vec<Box<dyn Benchmark + 'd>>, ConfigError> {
    let all = all_benchmarks(device, settings);
    if names.is_empty() || names.iter().any(|name| name.eq_ignore_ascii_case("all")) {
        return Ok(all);
    }

    let available: Vec<&'static str> = all.iter().map(|bench| bench.name()).collect();
    for name in names {
        let known = name == "reduce" || available.contains(&name.as_str());
        if !known {
            return Err(ConfigError::UnknownExperiment {
                name: name.clone(),
                available: available.join(", "),
            });
        }
    }
    Ok(all
        .into_iter()
        .filter(|bench| {
            names.iter().any(|name| {
                name == bench.name() || (name == "reduce" && bench.name().starts_with("reduce_"))
            })
        })
        .collect())
}

pub fn render_table(points: &[DataPoint]) -> String {
    if points.is_empty() {
        return "No results to display.\n".to_string();
    }
    let mut out = format!(
        "{:<16} {:>8} {:>12} {:>12} {:>9} {:>7} {:>6}\n",
        "Experiment", "Size", "Device (ms)", "CPU (ms)", "Speedup", "CV%", "Valid"
    );
    for point in points {
        out.push_str(&format!(
            "{:<16} {:>8} {:>12.3} {:>12.3} {:>8.2}x {:>7.1} {:>6}\n",
            point.experiment,
            format_size(point.size),
            point.device_stats.mean,
            point.cpu_stats.mean,
            point.speedup,
            point.device_stats.cv_percent(),
            if point.valid { "yes" } else { "NO" }
        ));
    }
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    device: &'a DeviceProperties,
    settings: &'a BenchSettings,
    results: &'a [DataPoint],
}

/// Writes results with the device and settings they were measured under.
pub fn write_json(
    path: &Path,
    device: &DeviceProperties,
    settings: &BenchSettings,
    points: &[DataPoint],
) -> Result<(), BenchError> {
    let report = JsonReport {
        device,
        settings,
        results: points,
    };
    let json = serde_json::to_string_pretty(&report)?;
    let write_error = |source| BenchError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, json).map_err(write_error)?;
    info!("results written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Emulator;

    fn tiny_settings() -> BenchSettings {
        BenchSettings {
            sizes: vec![1000, 4096],
            runs: 2,
            warmup: 1,
            ..BenchSettings::default()
        }
    }

    #[test]
    fn reduce_benchmark_produces_valid_points() {
        let emulator = Emulator::default();
        let settings = tiny_settings();
        let mut bench = ReduceBenchmark::new(&emulator, ReduceOptions::default(), InputPattern::Random);
        let points = run_benchmark(&mut bench, &settings).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.valid));
        assert_eq!(points[1].size, 4096);
        assert_eq!(points[0].device_stats.samples, 2);
    }

    #[test]
    fn matmul_benchmark_uses_square_root_of_size() {
        let emulator = Emulator::default();
        let settings = BenchSettings {
            sizes: vec![400],
            runs: 1,
            warmup: 0,
            ..BenchSettings::default()
        };
        let mut bench = MatmulBenchmark::new(&emulator, MatmulStrategy::Auto);
        let points = run_benchmark(&mut bench, &settings).unwrap();
        assert!(points[0].valid);
        assert_eq!(bench.shape, MatmulShape::square(20));
    }

    #[test]
    fn matmul_setup_rejects_matrices_too_large_to_allocate() {
        let emulator = Emulator::default();
        let mut bench = MatmulBenchmark::new(&emulator, MatmulStrategy::Auto);
        let err = bench
            .setup(isize::MAX as usize, &mut InputGenerator::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConfiguration(_)));
        assert!(bench.lhs.is_empty());
    }

    #[test]
    fn validate_before_any_run_is_a_mismatch() {
        let emulator = Emulator::default();
        let bench = ReduceBenchmark::new(&emulator, ReduceOptions::default(), InputPattern::Ramp);
        assert_eq!(bench.validate().unwrap_err().actual, "nothing");
    }

    #[test]
    fn device_errors_abort_the_run() {
        let emulator = Emulator::default();
        let options = ReduceOptions {
            group_size: 1000,
            ..ReduceOptions::default()
        };
        let mut bench = ReduceBenchmark::new(&emulator, options, InputPattern::Ramp);
        let err = run_benchmark(&mut bench, &tiny_settings()).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConfiguration(_)));
    }

    #[test]
    fn selection_by_name_and_group() {
        let emulator = Emulator::default();
        let settings = tiny_settings();
        fn names(benches: Vec<Box<dyn Benchmark + '_>>) -> Vec<&'static str> {
            benches.iter().map(|b| b.name()).collect()
        }

        assert_eq!(names(select_benchmarks(&emulator, &settings, &[]).unwrap()).len(), 4);
        assert_eq!(
            names(select_benchmarks(&emulator, &settings, &["reduce".to_string()]).unwrap()),
            vec!["reduce_atomic", "reduce_shuffle", "reduce_shared"]
        );
        assert_eq!(
            names(select_benchmarks(&emulator, &settings, &["matmul".to_string()]).unwrap()),
            vec!["matmul"]
        );
        let err = select_benchmarks(&emulator, &settings, &["scan".to_string()]).err();
        assert!(matches!(err, Some(ConfigError::UnknownExperiment { .. })));
    }

    #[test]
    fn table_lists_every_point() {
        let point = DataPoint {
            experiment: "reduce_shuffle".to_string(),
            size: 1_000_000,
            device_stats: compute_stats(&[1.0, 2.0]),
            cpu_stats: compute_stats(&[3.0]),
            speedup: 2.0,
            valid: true,
        };
        let table = render_table(&[point.clone(), point]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("reduce_shuffle"));
        assert!(table.contains("1M"));
    }

    #[test]
    fn json_report_round_trips_results() {
        let emulator = Emulator::default();
        let settings = BenchSettings {
            sizes: vec![256],
            runs: 1,
            warmup: 0,
            ..BenchSettings::default()
        };
        let mut bench = ReduceBenchmark::new(&emulator, ReduceOptions::default(), InputPattern::Ramp);
        let points = run_benchmark(&mut bench, &settings).unwrap();

        let path = std::env::temp_dir()
            .join(format!("gpu-microbench-{}", std::process::id()))
            .join("results.json");
        write_json(&path, emulator.properties(), &settings, &points).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["results"][0]["experiment"], "reduce_shuffle");
        assert_eq!(value["device"]["subgroup_width"], 32);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
