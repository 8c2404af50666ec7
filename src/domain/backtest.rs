//! Backtest configuration and run identity.
//!
//! [`BacktestConfig`] is the deserialized configuration document. Trend specs
//! and moving-average keys stay as text until [`BacktestConfig::validate`] or
//! the typed accessors parse them, so a bad key is reported against the field
//! it came from.

use crate::domain::chart::ChartInterval;
use crate::domain::error::SigbenchError;
use crate::domain::moving_average::MovingAverageKey;
use crate::domain::ohlcv::{PriceBar, PricePoint};
use crate::domain::pattern::{self, PatternDefinition};
use crate::domain::pattern::scanner::{clamp_lookback, ScanOptions};
use crate::domain::trend::{self, TrendSpec, TrendType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_LOOKBACK: usize = 15;
pub const DEFAULT_MIN_BARS: usize = 30;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 7200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BacktestType {
    #[serde(rename = "Candlestick Pattern")]
    CandlestickPattern,
    #[serde(rename = "Random Baseline")]
    RandomBaseline,
}

impl fmt::Display for BacktestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestType::CandlestickPattern => f.write_str("Candlestick Pattern"),
            BacktestType::RandomBaseline => f.write_str("Random Baseline"),
        }
    }
}

/// A move of `value` (a fraction, sign ignored) measured at `price_point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetPercentage {
    pub price_point: PricePoint,
    pub value: f64,
}

impl TargetPercentage {
    pub fn magnitude(&self) -> f64 {
        self.value.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrendSpecConfig {
    pub trend: String,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChartConfig {
    #[serde(default)]
    pub interval: ChartInterval,
    #[serde(default)]
    pub moving_averages: Vec<String>,
    #[serde(default)]
    pub trends: Vec<TrendSpecConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarketConfig {
    pub codes: Vec<String>,
    #[serde(default)]
    pub trends: Vec<TrendSpecConfig>,
}

/// Symbols with fewer bars, a lower last close or a thinner average volume
/// than these are not scanned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EligibilityFilter {
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
    #[serde(default)]
    pub min_price: f64,
    #[serde(default)]
    pub min_average_volume: f64,
}

impl EligibilityFilter {
    /// A history shorter than `min_bars` is `InsufficientData`.
    pub fn ensure_history(&self, code: &str, provider: &str, bars: &[PriceBar]) -> Result<(), SigbenchError> {
        if bars.len() < self.min_bars {
            return Err(SigbenchError::InsufficientData {
                code: code.to_string(),
                provider: provider.to_string(),
                bars: bars.len(),
                minimum: self.min_bars,
            });
        }
        Ok(())
    }

    /// Why `bars` should not be scanned on price or volume, or `None` when
    /// they qualify.
    pub fn rejection(&self, bars: &[PriceBar]) -> Option<String> {
        let last = bars.last()?;
        if last.close < self.min_price {
            return Some(format!("last close {} below {}", last.close, self.min_price));
        }
        let average_volume = bars.iter().map(|b| b.volume as f64).sum::<f64>() / bars.len() as f64;
        if average_volume < self.min_average_volume {
            return Some(format!(
                "average volume {average_volume:.0} below {}",
                self.min_average_volume
            ));
        }
        None
    }
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self {
            min_bars: DEFAULT_MIN_BARS,
            min_price: 0.0,
            min_average_volume: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub pool_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BacktestConfig {
    #[serde(rename = "type")]
    pub backtest_type: BacktestType,
    pub source: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entry_price_point: PricePoint,
    pub target_up: TargetPercentage,
    pub target_down: TargetPercentage,
    #[serde(default)]
    pub signal_names: Vec<String>,
    #[serde(default = "default_lookback")]
    pub length_of_prologue: usize,
    #[serde(default = "default_volume_factor")]
    pub volume_factor: f64,
    #[serde(default = "default_parallelization")]
    pub max_parallelization: usize,
    #[serde(default)]
    pub only_signal_with_market: bool,
    #[serde(default)]
    pub chart: Option<ChartConfig>,
    #[serde(default)]
    pub market: Option<MarketConfig>,
    #[serde(default)]
    pub filter: EligibilityFilter,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default)]
    pub random_seed: u64,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

fn default_lookback() -> usize {
    DEFAULT_LOOKBACK
}

fn default_volume_factor() -> f64 {
    1.0
}

fn default_parallelization() -> usize {
    1
}

fn default_min_bars() -> usize {
    DEFAULT_MIN_BARS
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> SigbenchError {
    SigbenchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> SigbenchError {
    SigbenchError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn parse_trend_specs(section: &str, specs: &[TrendSpecConfig]) -> Result<Vec<TrendSpec>, SigbenchError> {
    specs
        .iter()
        .map(|spec| {
            let trend: TrendType = spec
                .trend
                .parse()
                .map_err(|e: String| invalid(section, "trends", e))?;
            if let Some(w) = spec.weight {
                if !w.is_finite() || w < 0.0 {
                    return Err(invalid(section, "trends", format!("weight {w} for {trend}")));
                }
            }
            Ok(TrendSpec {
                trend,
                weight: spec.weight,
            })
        })
        .collect()
}

impl BacktestConfig {
    /// Checks every value the deserializer cannot, in document order. Signal
    /// names are resolved against the catalog here so an unknown name stops
    /// the run before it starts.
    pub fn validate(&self) -> Result<(), SigbenchError> {
        if self.name.trim().is_empty() {
            return Err(missing("backtest", "name"));
        }
        if self.source.trim().is_empty() {
            return Err(missing("backtest", "source"));
        }
        for (key, target) in [("targetUp", &self.target_up), ("targetDown", &self.target_down)] {
            if !target.value.is_finite() || target.value == 0.0 {
                return Err(invalid("backtest", key, format!("{} is not a usable move", target.value)));
            }
        }
        if !self.volume_factor.is_finite() || self.volume_factor <= 0.0 {
            return Err(invalid(
                "backtest",
                "volumeFactor",
                format!("must be > 0, got {}", self.volume_factor),
            ));
        }
        match self.backtest_type {
            BacktestType::CandlestickPattern => {
                if self.signal_names.is_empty() {
                    return Err(missing("backtest", "signalNames"));
                }
                self.patterns()?;
            }
            BacktestType::RandomBaseline => {}
        }
        trend::check_specs(&self.chart_trends()?)?;
        self.chart_moving_averages()?;
        if let Some(market) = &self.market {
            if market.codes.is_empty() {
                return Err(missing("market", "codes"));
            }
        }
        trend::check_specs(&self.market_trends()?)?;
        if self.filter.min_bars == 0 {
            return Err(invalid("filter", "minBars", "must be at least 1"));
        }
        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = self.date_range
        {
            if start > end {
                return Err(invalid("dateRange", "start", format!("{start} is after {end}")));
            }
        }
        if let Some(StorageConfig {
            pool_size: Some(0), ..
        }) = self.storage
        {
            return Err(invalid("storage", "poolSize", "must be at least 1"));
        }
        Ok(())
    }

    /// Fails when the configuration was written for a different runner.
    pub fn expect_type(&self, expected: BacktestType) -> Result<(), SigbenchError> {
        if self.backtest_type == expected {
            Ok(())
        } else {
            Err(SigbenchError::BacktestTypeMismatch {
                expected: expected.to_string(),
                found: self.backtest_type.to_string(),
            })
        }
    }

    pub fn patterns(&self) -> Result<Vec<&'static PatternDefinition>, SigbenchError> {
        pattern::resolve(&self.signal_names)
    }

    pub fn lookback(&self) -> usize {
        clamp_lookback(self.length_of_prologue)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            lookback: self.lookback(),
            volume_factor: self.volume_factor,
            only_with_market: self.only_signal_with_market,
        }
    }

    pub fn interval(&self) -> ChartInterval {
        self.chart.as_ref().map(|c| c.interval).unwrap_or_default()
    }

    /// Empty means the default composite trend.
    pub fn chart_trends(&self) -> Result<Vec<TrendSpec>, SigbenchError> {
        match &self.chart {
            Some(chart) => parse_trend_specs("chart", &chart.trends),
            None => Ok(Vec::new()),
        }
    }

    pub fn chart_moving_averages(&self) -> Result<Vec<MovingAverageKey>, SigbenchError> {
        let Some(chart) = &self.chart else {
            return Ok(Vec::new());
        };
        chart
            .moving_averages
            .iter()
            .map(|key| key.parse().map_err(|e: String| invalid("chart", "movingAverages", e)))
            .collect()
    }

    pub fn market_trends(&self) -> Result<Vec<TrendSpec>, SigbenchError> {
        match &self.market {
            Some(market) => parse_trend_specs("market", &market.trends),
            None => Ok(Vec::new()),
        }
    }

    pub fn outcome(&self) -> OutcomeTargets {
        OutcomeTargets {
            entry: self.entry_price_point,
            up: self.target_up,
            down: self.target_down,
        }
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range.unwrap_or_default()
    }
}

/// What the outcome resolver needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeTargets {
    pub entry: PricePoint,
    pub up: TargetPercentage,
    pub down: TargetPercentage,
}

/// Identity of one run; every result and stat row references `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRun {
    pub id: Uuid,
    pub process_id: Uuid,
    pub name: String,
    pub backtest_type: BacktestType,
    pub source: String,
    pub description: Option<String>,
    pub entry_price_point: PricePoint,
    pub target_up: TargetPercentage,
    pub target_down: TargetPercentage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BacktestRun {
    pub fn new(config: &BacktestConfig, process_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            process_id,
            name: config.name.clone(),
            backtest_type: config.backtest_type,
            source: config.source.clone(),
            description: config.description.clone(),
            entry_price_point: config.entry_price_point,
            target_up: config.target_up,
            target_down: config.target_down,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Scanning,
    Draining,
    Aggregating,
    Done,
}

impl RunState {
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Created => Some(RunState::Scanning),
            RunState::Scanning => Some(RunState::Draining),
            RunState::Draining => Some(RunState::Aggregating),
            RunState::Aggregating => Some(RunState::Done),
            RunState::Done => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Created => "Created",
            RunState::Scanning => "Scanning",
            RunState::Draining => "Draining",
            RunState::Aggregating => "Aggregating",
            RunState::Done => "Done",
        };
        f.write_str(s)
    }
}
