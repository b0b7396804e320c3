//! Benchmark configuration: built-in profiles, an optional TOML file and
//! command-line overrides.
//!
//! Precedence, highest first: command line, config file, profile, defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::{InputPattern, DEFAULT_SEED};
use crate::error::ConfigError;
use crate::reduce::DEFAULT_GROUP_SIZE;

/// Profile used when neither the file nor the command line names one.
pub const DEFAULT_PROFILE: &str = "quick";

/// Preset sizes, runs and warmup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchProfile {
    pub name: String,
    pub sizes: Vec<usize>,
    pub runs: u32,
    pub warmup: u32,
}

impl BenchProfile {
    /// 1M / 3 runs / 1 warmup.
    pub fn quick() -> Self {
        Self {
            name: "quick".to_string(),
            sizes: vec![1_000_000],
            runs: 3,
            warmup: 1,
        }
    }

    /// 1M + 10M / 10 runs / 3 warmup.
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            sizes: vec![1_000_000, 10_000_000],
            runs: 10,
            warmup: 3,
        }
    }

    /// 1M + 10M + 100M / 30 runs / 3 warmup.
    pub fn thorough() -> Self {
        Self {
            name: "thorough".to_string(),
            sizes: vec![1_000_000, 10_000_000, 100_000_000],
            runs: 30,
            warmup: 3,
        }
    }
}

pub fn profile(name: &str) -> Result<BenchProfile, ConfigError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "quick" => Ok(BenchProfile::quick()),
        "standard" => Ok(BenchProfile::standard()),
        "thorough" => Ok(BenchProfile::thorough()),
        _ => Err(ConfigError::UnknownProfile(name.to_string())),
    }
}

/// Largest element count a host buffer can hold.
pub const MAX_SIZE: usize = isize::MAX as usize;

/// Parses a human-readable element count.
///
/// Accepts `1M`, `100k`, fractional `0.5M`, and plain numbers with optional
/// `_` separators.
pub fn parse_size(input: &str) -> Result<usize, ConfigError> {
    let s = input.trim();
    let invalid = |reason: String| ConfigError::InvalidSize {
        input: input.to_string(),
        reason,
    };

    let (digits, multiplier) = if let Some(prefix) = s.strip_suffix(['M', 'm']) {
        (prefix, 1_000_000.0)
    } else if let Some(prefix) = s.strip_suffix(['K', 'k']) {
        (prefix, 1_000.0)
    } else {
        let count = s
            .replace('_', "")
            .parse::<usize>()
            .map_err(|err| invalid(err.to_string()))?;
        return if count > MAX_SIZE {
            Err(invalid(format!("larger than the limit of {}", MAX_SIZE)))
        } else {
            Ok(count)
        };
    };

    let value: f64 = digits
        .replace('_', "")
        .parse()
        .map_err(|err: std::num::ParseFloatError| invalid(err.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid("must be a non-negative number".to_string()));
    }
    let count = (value * multiplier).round();
    if count >= MAX_SIZE as f64 {
        return Err(invalid(format!("larger than the limit of {}", MAX_SIZE)));
    }
    Ok(count as usize)
}

pub fn parse_sizes(raw: &[String]) -> Result<Vec<usize>, ConfigError> {
    raw.iter().map(|s| parse_size(s)).collect()
}

/// Partial configuration as read from a TOML file or collected from flags.
///
/// Every field is optional; unset fields fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub profile: Option<String>,
    pub experiments: Option<Vec<String>>,
    pub sizes: Option<Vec<String>>,
    pub runs: Option<u32>,
    pub warmup: Option<u32>,
    pub seed: Option<u64>,
    pub group_size: Option<u32>,
    pub pattern: Option<String>,
    pub json_file: Option<PathBuf>,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Layers `overrides` on top of `self`; set fields of `overrides` win.
    pub fn merge(self, overrides: BenchConfig) -> BenchConfig {
        BenchConfig {
            profile: overrides.profile.or(self.profile),
            experiments: overrides.experiments.or(self.experiments),
            sizes: overrides.sizes.or(self.sizes),
            runs: overrides.runs.or(self.runs),
            warmup: overrides.warmup.or(self.warmup),
            seed: overrides.seed.or(self.seed),
            group_size: overrides.group_size.or(self.group_size),
            pattern: overrides.pattern.or(self.pattern),
            json_file: overrides.json_file.or(self.json_file),
        }
    }

    /// Fills every unset field from the selected profile and the defaults.
    pub fn resolve(self) -> Result<BenchSettings, ConfigError> {
        let profile = profile(self.profile.as_deref().unwrap_or(DEFAULT_PROFILE))?;
        let sizes = match self.sizes {
            Some(raw) => parse_sizes(&raw)?,
            None => profile.sizes,
        };
        let pattern = match self.pattern {
            Some(raw) => raw.parse()?,
            None => InputPattern::default(),
        };
        Ok(BenchSettings {
            profile: profile.name,
            experiments: self.experiments.unwrap_or_default(),
            sizes,
            runs: self.runs.unwrap_or(profile.runs),
            warmup: self.warmup.unwrap_or(profile.warmup),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            group_size: self.group_size.unwrap_or(DEFAULT_GROUP_SIZE),
            pattern,
            json_file: self.json_file,
        })
    }
}

/// Fully resolved benchmark settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchSettings {
    pub profile: String,
    /// Experiment names to run; empty means all.
    pub experiments: Vec<String>,
    pub sizes: Vec<usize>,
    pub runs: u32,
    pub warmup: u32,
    pub seed: u64,
    pub group_size: u32,
    pub pattern: InputPattern,
    pub json_file: Option<PathBuf>,
}

impl Default for BenchSettings {
    fn default() -> Self {
        let profile = BenchProfile::quick();
        Self {
            profile: profile.name,
            experiments: Vec::new(),
            sizes: profile.sizes,
            runs: profile.runs,
            warmup: profile.warmup,
            seed: DEFAULT_SEED,
            group_size: DEFAULT_GROUP_SIZE,
            pattern: InputPattern::default(),
            json_file: None,
        }
    }
}

/// Formats an element count for display, e.g. `1000000` as `1M`.
pub fn format_size(size: usize) -> String {
    if size >= 1_000_000 && size % 1_000_000 == 0 {
        format!("{}M", size / 1_000_000)
    } else if size >= 1_000 && size % 1_000 == 0 {
        format!("{}K", size / 1_000)
    } else {
        size.to_string()
    }
}
