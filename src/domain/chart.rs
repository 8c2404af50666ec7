//! One symbol's bar series with its derived trend and helper statistics.

use crate::domain::error::SigbenchError;
use crate::domain::moving_average::{MovingAverage, MovingAverageKey};
use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{self, TrendSentiment, TrendSpec, TrendValue};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Positions before this have too little history for tall/short comparisons.
const MIN_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartInterval {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
}

impl fmt::Display for ChartInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChartInterval::Daily => "Daily",
            ChartInterval::Weekly => "Weekly",
            ChartInterval::Monthly => "Monthly",
            ChartInterval::Quarterly => "Quarterly",
            ChartInterval::Annually => "Annually",
        };
        f.write_str(s)
    }
}

impl FromStr for ChartInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(ChartInterval::Daily),
            "weekly" | "week" => Ok(ChartInterval::Weekly),
            "monthly" | "month" => Ok(ChartInterval::Monthly),
            "quarterly" | "quarter" => Ok(ChartInterval::Quarterly),
            "annually" | "annual" | "yearly" => Ok(ChartInterval::Annually),
            other => Err(format!("unknown chart interval: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChartInfo {
    pub source: String,
    pub code: String,
    pub industry: Option<String>,
    pub sector: Option<String>,
    pub interval: ChartInterval,
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub info: ChartInfo,
    bars: Vec<PriceBar>,
    trend: Vec<TrendValue>,
    moving_averages: Vec<MovingAverage>,
    average_body_heights: Vec<f64>,
    average_volumes: Vec<i64>,
}

impl Chart {
    pub fn builder(info: ChartInfo, bars: Vec<PriceBar>) -> ChartBuilder {
        ChartBuilder {
            info,
            bars,
            moving_averages: Vec::new(),
            trends: None,
            trend_values: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn bar(&self, position: usize) -> Option<&PriceBar> {
        self.bars.get(position)
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// True once a trend value exists for every bar.
    pub fn has_trend(&self) -> bool {
        !self.bars.is_empty() && self.trend.len() == self.bars.len()
    }

    pub fn trend(&self) -> &[TrendValue] {
        &self.trend
    }

    pub fn trend_at(&self, position: usize) -> Option<TrendValue> {
        self.trend.get(position).copied()
    }

    pub fn moving_average(&self, key: MovingAverageKey) -> Option<&MovingAverage> {
        self.moving_averages.iter().find(|m| m.key == key)
    }

    pub fn moving_averages(&self) -> &[MovingAverage] {
        &self.moving_averages
    }

    /// Bars are date ordered, so this is a binary search.
    pub fn index_of_date(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok()
    }

    /// Cumulative mean of body heights through `position`.
    pub fn average_body_height(&self, position: usize) -> Option<f64> {
        self.average_body_heights.get(position).copied()
    }

    /// Cumulative mean volume through `position`, rounded up.
    pub fn average_volume(&self, position: usize) -> Option<i64> {
        self.average_volumes.get(position).copied()
    }

    /// Sentiment of the `lookback` bars before `position` relative to it:
    /// bullish when every prologue high sits below this bar's high, bearish
    /// when every prologue low sits above this bar's low.
    pub fn lookback_sentiment(&self, position: usize, lookback: usize) -> TrendSentiment {
        if lookback == 0 || position < lookback || position >= self.bars.len() {
            return TrendSentiment::Neutral;
        }
        let bar = &self.bars[position];
        let prologue = &self.bars[position - lookback..position];
        if prologue.iter().all(|b| b.high < bar.high) {
            TrendSentiment::Bullish
        } else if prologue.iter().all(|b| b.low > bar.low) {
            TrendSentiment::Bearish
        } else {
            TrendSentiment::Neutral
        }
    }

    /// Whether the body at `position` exceeds `tolerance` (at least 1) times the
    /// average body of the preceding `lookback` bars, or of all preceding bars
    /// when `lookback` is 0.
    pub fn is_tall(&self, position: usize, lookback: usize, tolerance: f64) -> bool {
        let tolerance = tolerance.max(1.0);
        match self.preceding_body_average(position, lookback) {
            Some(avg) => self.bars[position].body().length() > tolerance * avg,
            None => false,
        }
    }

    /// Mirror of [`Chart::is_tall`]; `tolerance` is capped at 1.
    pub fn is_short(&self, position: usize, lookback: usize, tolerance: f64) -> bool {
        let tolerance = tolerance.min(1.0);
        match self.preceding_body_average(position, lookback) {
            Some(avg) => self.bars[position].body().length() < tolerance * avg,
            None => false,
        }
    }

    fn preceding_body_average(&self, position: usize, lookback: usize) -> Option<f64> {
        if position < MIN_HISTORY || position >= self.bars.len() {
            return None;
        }
        if lookback == 0 {
            return self.average_body_heights.get(position - 1).copied();
        }
        let start = position.saturating_sub(lookback);
        let window = &self.bars[start..position];
        Some(window.iter().map(|b| b.body().length()).sum::<f64>() / window.len() as f64)
    }
}

pub struct ChartBuilder {
    info: ChartInfo,
    bars: Vec<PriceBar>,
    moving_averages: Vec<MovingAverageKey>,
    trends: Option<Vec<TrendSpec>>,
    trend_values: Option<Vec<TrendValue>>,
}

impl ChartBuilder {
    /// Converts daily bars to the target interval before anything is derived.
    pub fn interval(mut self, interval: ChartInterval) -> Self {
        if self.info.interval == ChartInterval::Daily && interval != ChartInterval::Daily {
            self.bars = convert_interval(&self.bars, interval);
            self.info.interval = interval;
        }
        self
    }

    pub fn moving_averages(mut self, keys: &[MovingAverageKey]) -> Self {
        self.moving_averages.extend_from_slice(keys);
        self
    }

    /// An empty slice selects the default composite.
    pub fn trends(mut self, specs: &[TrendSpec]) -> Self {
        self.trends = Some(specs.to_vec());
        self
    }

    /// Uses already computed trend values instead of running the engine.
    pub fn trend_values(mut self, values: Vec<TrendValue>) -> Self {
        self.trend_values = Some(values);
        self
    }

    pub fn build(self) -> Result<Chart, SigbenchError> {
        if self.bars.is_empty() {
            return Err(SigbenchError::InvalidInput {
                reason: format!("cannot build a chart for {} with no bars", self.info.code),
            });
        }

        let trend = match (self.trend_values, &self.trends) {
            (Some(values), _) => {
                if values.len() != self.bars.len() {
                    return Err(SigbenchError::InvalidInput {
                        reason: format!(
                            "{} trend values supplied for {} bars of {}",
                            values.len(),
                            self.bars.len(),
                            self.info.code
                        ),
                    });
                }
                values
            }
            (None, Some(specs)) => trend::build(specs, &self.bars)?,
            (None, None) => Vec::new(),
        };

        let moving_averages = self
            .moving_averages
            .iter()
            .map(|key| MovingAverage::compute(*key, &self.bars))
            .collect();

        let n = self.bars.len();
        let mut average_body_heights = Vec::with_capacity(n);
        let mut average_volumes: Vec<i64> = Vec::with_capacity(n);

        for (p, bar) in self.bars.iter().enumerate() {
            let body = bar.body().length();
            match p {
                0 => {
                    average_body_heights.push(body);
                    average_volumes.push(bar.volume);
                }
                _ => {
                    let prev_body = average_body_heights[p - 1];
                    average_body_heights.push(prev_body + (body - prev_body) / (p + 1) as f64);
                    let prev_vol = average_volumes[p - 1] as f64;
                    let next = prev_vol + (bar.volume as f64 - prev_vol) / (p + 1) as f64;
                    average_volumes.push(next.ceil() as i64);
                }
            }
        }

        Ok(Chart {
            info: self.info,
            bars: self.bars,
            trend,
            moving_averages,
            average_body_heights,
            average_volumes,
        })
    }
}

/// Aggregates daily bars into periods: first open, max high, min low, last
/// close, summed volume, dated at the period's first bar.
pub fn convert_interval(bars: &[PriceBar], interval: ChartInterval) -> Vec<PriceBar> {
    if interval == ChartInterval::Daily {
        return bars.to_vec();
    }
    let period_of = |d: NaiveDate| -> (i32, u32) {
        match interval {
            ChartInterval::Daily => (d.year(), d.ordinal()),
            ChartInterval::Weekly => {
                let w = d.iso_week();
                (w.year(), w.week())
            }
            ChartInterval::Monthly => (d.year(), d.month()),
            ChartInterval::Quarterly => (d.year(), (d.month() - 1) / 3),
            ChartInterval::Annually => (d.year(), 0),
        }
    };

    let mut out: Vec<PriceBar> = Vec::new();
    let mut current: Option<(i32, u32)> = None;
    for bar in bars {
        let period = period_of(bar.date);
        match out.last_mut() {
            Some(agg) if current == Some(period) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                out.push(bar.clone());
                current = Some(period);
            }
        }
    }
    out
}

/// Averages several symbols' bars per date into one synthetic series named
/// `code`. Volume is the ceiling of the mean.
pub fn combine_market(source: &str, code: &str, series: &[Vec<PriceBar>]) -> Vec<PriceBar> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PriceBar>> = BTreeMap::new();
    for bars in series {
        for bar in bars {
            by_date.entry(bar.date).or_default().push(bar);
        }
    }

    by_date
        .into_iter()
        .map(|(date, bars)| {
            let n = bars.len() as f64;
            let mean = |f: fn(&PriceBar) -> f64| bars.iter().map(|b| f(b)).sum::<f64>() / n;
            PriceBar {
                source: source.to_string(),
                code: code.to_string(),
                date,
                open: mean(|b| b.open),
                high: mean(|b| b.high),
                low: mean(|b| b.low),
                close: mean(|b| b.close),
                volume: mean(|b| b.volume as f64).ceil() as i64,
                factor: 1.0,
            }
        })
        .collect()
}
