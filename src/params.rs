//! Parameter metadata for detector families
//!
//! Every detector threshold lives in a typed params struct. This module
//! provides metadata about those parameters, enabling:
//! - Overrides from flat key/value maps (`with_params`)
//! - Parameter documentation
//! - Calibration sweeps against a labeled sample set
//!
//! # Example
//!
//! ```rust
//! use setupscan::params::ParamSet;
//! use setupscan::prelude::*;
//!
//! for param in PoleFlagParams::param_meta() {
//!   println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! ```

use std::collections::HashMap;

use crate::{Period, Ratio, Result, SetupError};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value (0.0..=1.0)
  Ratio,
  /// Period value (positive integer bar count)
  Period,
  /// Unbounded multiplier or return (e.g. pole return 0.9 = +90%)
  Scalar,
}

/// Metadata for a single detector parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "min_pole_return")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Range for sweeps: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn scalar(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Scalar, default, range, description }
  }

  /// Generate all values for a sweep
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    let mut values = Vec::new();
    let mut v = min;
    while v <= max + f64::EPSILON {
      values.push(v);
      v += step;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value.is_nan() || value < min || value > max {
      return Err(SetupError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(SetupError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Scalar => Ok(()),
    }
  }
}

// ============================================================
// PARAMETER SET TRAIT
// ============================================================

/// Typed threshold set of one detector family
pub trait ParamSet: Sized + Default {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a params struct from a flat map.
  ///
  /// Missing parameters use their default values; present ones are checked
  /// against their metadata range.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  /// Detector family the parameters belong to
  fn family() -> &'static str;

  /// Cross-field consistency checks (min <= max and the like)
  fn validate(&self) -> Result<()> {
    Ok(())
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

fn checked(meta: &'static [ParamMeta], key: &str, value: f64) -> Result<f64> {
  if let Some(m) = meta.iter().find(|m| m.name == key) {
    m.validate(value)?;
  }
  Ok(value)
}

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(
  meta: &'static [ParamMeta],
  params: &HashMap<&str, f64>,
  key: &str,
  default: f64,
) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(checked(meta, key, value)?)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(
  meta: &'static [ParamMeta],
  params: &HashMap<&str, f64>,
  key: &str,
  default: usize,
) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  Period::new(checked(meta, key, value)? as usize)
}

/// Helper to get a plain scalar from params with default fallback
pub fn get_scalar(
  meta: &'static [ParamMeta],
  params: &HashMap<&str, f64>,
  key: &str,
  default: f64,
) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  checked(meta, key, value)
}

/// Ensure `lo <= hi` for a pair of bounds
pub fn ensure_ordered(family: &str, lo_name: &str, lo: f64, hi_name: &str, hi: f64) -> Result<()> {
  if lo > hi {
    return Err(SetupError::InvalidConfig(format!(
      "{family}: {lo_name} ({lo}) must not exceed {hi_name} ({hi})"
    )));
  }
  Ok(())
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  static META: &[ParamMeta] = &[
    ParamMeta::ratio("band", 0.05, (0.01, 0.2, 0.01), "Band"),
    ParamMeta::period("window", 7.0, (2.0, 20.0, 1.0), "Window"),
    ParamMeta::scalar("pole", 0.9, (0.1, 5.0, 0.1), "Pole"),
  ];

  #[test]
  fn test_param_meta_ratio() {
    let meta = &META[0];
    assert_eq!(meta.name, "band");
    assert_eq!(meta.param_type, ParamType::Ratio);
    assert_eq!(meta.default, 0.05);
  }

  #[test]
  fn test_generate_grid() {
    let meta = ParamMeta::ratio("test", 0.5, (0.3, 0.7, 0.2), "Test");

    let grid = meta.generate_grid();
    assert_eq!(grid.len(), 3);
    assert!((grid[0] - 0.3).abs() < f64::EPSILON);
    assert!((grid[1] - 0.5).abs() < f64::EPSILON);
    assert!((grid[2] - 0.7).abs() < f64::EPSILON);
  }

  #[test]
  fn test_validate_period() {
    let meta = &META[1];
    assert!(meta.validate(7.0).is_ok());
    assert!(meta.validate(7.5).is_err());
    assert!(meta.validate(1.0).is_err());
    assert!(meta.validate(21.0).is_err());
  }

  #[test]
  fn test_getters_use_defaults_and_validate() {
    let mut params = HashMap::new();
    params.insert("band", 0.08);
    params.insert("window", 10.0);

    assert!((get_ratio(META, &params, "band", 0.05).unwrap().get() - 0.08).abs() < f64::EPSILON);
    assert_eq!(get_period(META, &params, "window", 7).unwrap().get(), 10);
    assert!((get_scalar(META, &params, "pole", 0.9).unwrap() - 0.9).abs() < f64::EPSILON);

    params.insert("band", 0.5);
    assert!(get_ratio(META, &params, "band", 0.05).is_err());
  }

  #[test]
  fn test_ensure_ordered() {
    assert!(ensure_ordered("cup", "min_depth", 0.1, "max_depth", 0.3).is_ok());
    let err = ensure_ordered("cup", "min_depth", 0.4, "max_depth", 0.3).unwrap_err();
    assert!(err.to_string().contains("min_depth"));
  }
}
