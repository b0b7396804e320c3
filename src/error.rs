use std::path::PathBuf;

/// Failures raised by a device while allocating memory or running a kernel.
///
/// None of these are retried: they point at a configuration defect or a
/// broken environment.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device initialization failed: {0}")]
    Initialization(String),
    #[error("device memory allocation failed: {0}")]
    Allocation(String),
    #[error("invalid launch configuration: {0}")]
    InvalidConfiguration(String),
    #[error("kernel `{kernel}` faulted: {reason}")]
    Fault { kernel: String, reason: String },
}

#[cfg(feature = "cuda")]
impl From<cust::error::CudaError> for DeviceError {
    fn from(err: cust::error::CudaError) -> Self {
        use cust::error::CudaError;

        match err {
            CudaError::OutOfMemory => DeviceError::Allocation(err.to_string()),
            CudaError::InvalidValue
            | CudaError::LaunchOutOfResources
            | CudaError::InvalidPtx
            | CudaError::NotFound => DeviceError::InvalidConfiguration(err.to_string()),
            CudaError::NoDevice | CudaError::NotInitialized | CudaError::InvalidDevice => {
                DeviceError::Initialization(err.to_string())
            }
            other => DeviceError::Fault {
                kernel: "cuda".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// A device result that disagrees with the CPU reference.
///
/// Kept apart from [`DeviceError`]: the kernel ran to completion, its answer
/// is just wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} is not correct: expected {expected}, got {actual}")]
pub struct Mismatch {
    pub what: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new(
        what: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid size '{input}': {reason}")]
    InvalidSize { input: String, reason: String },
    #[error("unknown profile '{0}', valid profiles: quick, standard, thorough")]
    UnknownProfile(String),
    #[error("invalid input pattern '{0}', expected ramp, random or a value in 0..=255")]
    InvalidPattern(String),
    #[error("unknown experiment '{name}', available: {available}")]
    UnknownExperiment { name: String, available: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level error of the benchmark binary and harness.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Mismatch(#[from] Mismatch),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_both_values() {
        let err = Mismatch::new("sum", 10u64, 9u64);
        assert_eq!(err.to_string(), "sum is not correct: expected 10, got 9");
    }

    #[test]
    fn bench_error_keeps_mismatch_distinct_from_device_errors() {
        let mismatch: BenchError = Mismatch::new("sum", 1, 2).into();
        let device: BenchError = DeviceError::Allocation("out of memory".into()).into();
        assert!(matches!(mismatch, BenchError::Mismatch(_)));
        assert!(matches!(device, BenchError::Device(DeviceError::Allocation(_))));
    }
}
