//! Seeded input generation for the benchmarks.

use std::fmt;
use std::str::FromStr;

use nanorand::{Rng, WyRand};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 3333;

/// Upper bound (exclusive) of generated matrix elements.
pub const MATRIX_VALUE_BOUND: u32 = 1024;

/// How the bytes of a reduction input are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPattern {
    /// `values[i] = (i + 1) % 128`.
    #[default]
    Ramp,
    /// Uniform over the whole `u8` range.
    Random,
    Constant(u8),
}

impl fmt::Display for InputPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputPattern::Ramp => write!(f, "ramp"),
            InputPattern::Random => write!(f, "random"),
            InputPattern::Constant(value) => write!(f, "{}", value),
        }
    }
}

impl FromStr for InputPattern {
    type Err = ConfigError;

    /// Accepts `ramp`, `random` or a constant byte value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ramp" => Ok(InputPattern::Ramp),
            "random" => Ok(InputPattern::Random),
            other => other
                .parse::<u8>()
                .map(InputPattern::Constant)
                .map_err(|_| ConfigError::InvalidPattern(s.to_string())),
        }
    }
}

/// Deterministic generator; equal seeds give equal inputs.
pub struct InputGenerator {
    rng: WyRand,
}

impl InputGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: WyRand::new_seed(seed),
        }
    }

    pub fn bytes(&mut self, pattern: InputPattern, len: usize) -> Vec<u8> {
        match pattern {
            InputPattern::Ramp => ramp(len),
            InputPattern::Constant(value) => vec![value; len],
            InputPattern::Random => {
                let mut values = vec![0u8; len];
                self.rng.fill(&mut values);
                values
            }
        }
    }

    /// A `rows x cols` row-major matrix of values in `0..MATRIX_VALUE_BOUND`.
    pub fn matrix(&mut self, rows: usize, cols: usize) -> Vec<i32> {
        (0..rows * cols)
            .map(|_| self.rng.generate_range(0..MATRIX_VALUE_BOUND) as i32)
            .collect()
    }

    pub fn shuffle<T>(&mut self, values: &mut [T]) {
        self.rng.shuffle(values);
    }
}

impl Default for InputGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

fn ramp(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i + 1) % 128) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_wraps_at_128() {
        let values = InputGenerator::default().bytes(InputPattern::Ramp, 130);
        assert_eq!(values[0], 1);
        assert_eq!(values[126], 127);
        assert_eq!(values[127], 0);
        assert_eq!(values[129], 2);
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = InputGenerator::new(7).bytes(InputPattern::Random, 1000);
        let b = InputGenerator::new(7).bytes(InputPattern::Random, 1000);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let a = InputGenerator::new(1).bytes(InputPattern::Random, 1000);
        let b = InputGenerator::new(2).bytes(InputPattern::Random, 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn matrix_values_are_bounded() {
        let matrix = InputGenerator::default().matrix(33, 17);
        assert_eq!(matrix.len(), 33 * 17);
        assert!(matrix.iter().all(|&v| (0..MATRIX_VALUE_BOUND as i32).contains(&v)));
    }

    #[test]
    fn shuffle_keeps_elements() {
        let mut values: Vec<u8> = (0..=255).collect();
        InputGenerator::new(11).shuffle(&mut values);
        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..=255).collect::<Vec<u8>>());
    }

    #[test]
    fn parses_patterns() {
        assert_eq!("ramp".parse::<InputPattern>().unwrap(), InputPattern::Ramp);
        assert_eq!("Random".parse::<InputPattern>().unwrap(), InputPattern::Random);
        assert_eq!("127".parse::<InputPattern>().unwrap(), InputPattern::Constant(127));
        assert!(matches!(
            "256".parse::<InputPattern>(),
            Err(ConfigError::InvalidPattern(_))
        ));
        assert!("zigzag".parse::<InputPattern>().is_err());
    }
}
