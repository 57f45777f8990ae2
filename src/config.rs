//! Engine configuration
//!
//! One immutable [`EngineConfig`] value is passed to every entry point. It
//! deserializes from TOML with every field optional, so a file only needs the
//! values it changes.

use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    params::{get_count, get_value, Tunable, ENGINE_PARAMS},
    Result, SentinelError,
};

/// Partial-profit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// TP parked at 3R, half closed near 3R, stop to breakeven
    #[default]
    Conservative,
    /// Positions run untouched to their broker-side stop and target
    Aggressive,
}

impl TradingMode {
    /// Case-insensitive parse. Anything unrecognised is conservative.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "aggressive" => TradingMode::Aggressive,
            "conservative" => TradingMode::Conservative,
            other => {
                tracing::warn!(mode = other, "unknown trading mode, using conservative");
                TradingMode::Conservative
            }
        }
    }
}

impl<'de> Deserialize<'de> for TradingMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(TradingMode::parse_lenient(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Scan
    pub min_candle_size_pips: f64,
    pub lookback_days: usize,
    pub min_intraday_bars: usize,
    pub validation_lookahead: usize,
    pub exhaustive_gap_validation: bool,

    // Risk / execution
    pub risk_per_trade_pct: f64,
    pub order_retries: u32,
    pub deviation_points: u32,
    pub cancel_unfilled_at_end_of_day: bool,
    pub duplicate_price_tolerance_points: u32,
    pub adjust_buy_limit_for_spread: bool,
    pub adjust_sell_limit_for_spread: bool,

    // Identification
    pub magic_number: u64,
    pub order_comment: String,

    // Position management
    pub trading_mode: TradingMode,
    pub partial_trigger_r: f64,
    pub partial_close_fraction: f64,

    /// Symbols scanned each cycle, in order
    pub symbols: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_candle_size_pips: 50.0,
            lookback_days: 7,
            min_intraday_bars: 10,
            validation_lookahead: 12,
            exhaustive_gap_validation: false,
            risk_per_trade_pct: 0.5,
            order_retries: 5,
            deviation_points: 20,
            cancel_unfilled_at_end_of_day: true,
            duplicate_price_tolerance_points: 10,
            adjust_buy_limit_for_spread: true,
            adjust_sell_limit_for_spread: false,
            magic_number: 19631963,
            order_comment: "Sentinel".to_string(),
            trading_mode: TradingMode::Conservative,
            partial_trigger_r: 2.95,
            partial_close_fraction: 0.5,
            symbols: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate TOML
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_params()?;
        if self.order_comment.len() > 31 {
            return Err(SentinelError::InvalidConfig(format!(
                "order_comment longer than 31 characters: {}",
                self.order_comment
            )));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(SentinelError::InvalidConfig("empty symbol name".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn is_conservative(&self) -> bool {
        self.trading_mode == TradingMode::Conservative
    }
}

impl Tunable for EngineConfig {
    fn param_meta() -> &'static [crate::params::ParamMeta] {
        ENGINE_PARAMS
    }

    fn param_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("min_candle_size_pips", self.min_candle_size_pips),
            ("lookback_days", self.lookback_days as f64),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("duplicate_price_tolerance_points", self.duplicate_price_tolerance_points as f64),
            ("deviation_points", self.deviation_points as f64),
            ("order_retries", self.order_retries as f64),
            ("partial_trigger_r", self.partial_trigger_r),
            ("partial_close_fraction", self.partial_close_fraction),
            ("validation_lookahead", self.validation_lookahead as f64),
            ("min_intraday_bars", self.min_intraday_bars as f64),
        ]
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_candle_size_pips: get_value(params, "min_candle_size_pips")?,
            lookback_days: get_count(params, "lookback_days")?,
            risk_per_trade_pct: get_value(params, "risk_per_trade_pct")?,
            duplicate_price_tolerance_points: get_count(params, "duplicate_price_tolerance_points")? as u32,
            deviation_points: get_count(params, "deviation_points")? as u32,
            order_retries: get_count(params, "order_retries")? as u32,
            partial_trigger_r: get_value(params, "partial_trigger_r")?,
            partial_close_fraction: get_value(params, "partial_close_fraction")?,
            validation_lookahead: get_count(params, "validation_lookahead")?,
            min_intraday_bars: get_count(params, "min_intraday_bars")?,
            ..Self::default()
        })
    }
}
