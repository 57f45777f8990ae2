//! Parameter metadata for engine tunables
//!
//! Every numeric knob of [`EngineConfig`](crate::config::EngineConfig) is
//! described here once: name, kind, default, accepted range and a short
//! description. Config loading validates against this table, and the same table
//! drives documentation and parameter sweeps.
//!
//! # Example
//!
//! ```rust
//! use sentinel::params::Tunable;
//! use sentinel::prelude::*;
//!
//! for param in EngineConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! assert!(EngineConfig::default().validate_params().is_ok());
//! ```

use std::collections::HashMap;

use crate::{Result, SentinelError};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Unitless fraction or multiple (e.g. partial close fraction, R trigger)
  Ratio,
  /// Non-negative integer count (bars, days, attempts, points)
  Count,
  /// Price distance expressed in points
  Pips,
  /// Percentage of account balance
  Percent,
}

/// Metadata for a single tunable parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name, identical to the config field name
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Accepted range (min, max), both inclusive
  pub range: (f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn new(
    name: &'static str,
    param_type: ParamType,
    default: f64,
    range: (f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(SentinelError::InvalidValue("parameter must be finite"));
    }
    let (min, max) = self.range;
    if value < min || value > max {
      return Err(SentinelError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Count => {
        if value.fract() != 0.0 {
          return Err(SentinelError::InvalidValue("count must be a whole number"));
        }
        Ok(())
      },
      ParamType::Percent => {
        if value <= 0.0 {
          return Err(SentinelError::InvalidValue("percentage must be positive"));
        }
        Ok(())
      },
      ParamType::Ratio | ParamType::Pips => Ok(()),
    }
  }
}

// ============================================================
// ENGINE PARAMETER TABLE
// ============================================================

pub static ENGINE_PARAMS: &[ParamMeta] = &[
  ParamMeta::new(
    "min_candle_size_pips",
    ParamType::Pips,
    50.0,
    (0.0, 100_000.0),
    "Minimum C1 body, in points, for an exhaustion day",
  ),
  ParamMeta::new(
    "lookback_days",
    ParamType::Count,
    7.0,
    (3.0, 365.0),
    "Daily bars requested per scan (at least 5 are always fetched)",
  ),
  ParamMeta::new(
    "risk_per_trade_pct",
    ParamType::Percent,
    0.5,
    (0.01, 10.0),
    "Balance percentage risked between entry and stop",
  ),
  ParamMeta::new(
    "duplicate_price_tolerance_points",
    ParamType::Count,
    10.0,
    (0.0, 10_000.0),
    "Entry distance, in points, under which an existing order or position is a duplicate",
  ),
  ParamMeta::new(
    "deviation_points",
    ParamType::Count,
    20.0,
    (0.0, 10_000.0),
    "Allowed slippage passed with each order request",
  ),
  ParamMeta::new(
    "order_retries",
    ParamType::Count,
    5.0,
    (1.0, 20.0),
    "Submission attempts per order within one cycle",
  ),
  ParamMeta::new(
    "partial_trigger_r",
    ParamType::Ratio,
    2.95,
    (0.5, 10.0),
    "R multiple at which the partial close fires",
  ),
  ParamMeta::new(
    "partial_close_fraction",
    ParamType::Ratio,
    0.5,
    (0.01, 0.99),
    "Share of the position closed at the partial",
  ),
  ParamMeta::new(
    "validation_lookahead",
    ParamType::Count,
    12.0,
    (1.0, 500.0),
    "Candles after a reaction searched for displacement",
  ),
  ParamMeta::new(
    "min_intraday_bars",
    ParamType::Count,
    10.0,
    (3.0, 2_000.0),
    "Intraday candles required for the pattern day",
  ),
];

/// Look up a parameter by name
pub fn param(name: &str) -> Option<&'static ParamMeta> {
  ENGINE_PARAMS.iter().find(|p| p.name == name)
}

// ============================================================
// TUNABLE TRAIT
// ============================================================

/// Types whose numeric knobs are described by a [`ParamMeta`] table
pub trait Tunable: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Current value of every parameter, by name
  fn param_values(&self) -> Vec<(&'static str, f64)>;

  /// Build from a name -> value map. Missing parameters use their defaults.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  /// Check every current value against its metadata
  fn validate_params(&self) -> Result<()> {
    for (name, value) in self.param_values() {
      let meta = Self::param_meta()
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| SentinelError::InvalidConfig(format!("unknown parameter {name}")))?;
      meta.validate(value)?;
    }
    Ok(())
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Fetch a value with default fallback, validated against its metadata
pub fn get_value(params: &HashMap<&str, f64>, key: &'static str) -> Result<f64> {
  let meta = param(key).ok_or(SentinelError::InvalidValue("unknown parameter"))?;
  let value = params.get(key).copied().unwrap_or(meta.default);
  meta.validate(value)?;
  Ok(value)
}

/// Fetch a count with default fallback
pub fn get_count(params: &HashMap<&str, f64>, key: &'static str) -> Result<usize> {
  get_value(params, key).map(|v| v as usize)
}

// ============================================================
// TESTS
// ============================================================
