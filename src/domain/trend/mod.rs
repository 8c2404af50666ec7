//! Trend engine: bounded per-bar sentiment scores.
//!
//! Each sub-indicator produces a [`TrendSeries`] of scores in [-1, 1]. A
//! composite multiplies sub-indicator series by fixed weights that must sum
//! to 1, so the composite stays bounded too. [`TrendValue`] pairs a score
//! with its [`TrendSentiment`] bucket.

pub mod candlestick;
pub mod crossover;
pub mod extreme;
pub mod multi_ma;
pub mod price_to_ma;

use crate::domain::error::SigbenchError;
use crate::domain::moving_average::MovingAverageKey;
use crate::domain::ohlcv::PriceBar;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Window used for volume factors and regressions unless an indicator says otherwise.
pub const DEFAULT_LOOKBACK: usize = 20;

/// Extreme, price-to-MA 21/50/200, multiple-MA, candlestick.
pub const COMPOSITE_WEIGHTS: [f64; 6] = [0.37, 0.24, 0.16, 0.11, 0.08, 0.04];
pub const COMPOSITE_PERIODS: [usize; 3] = [21, 50, 200];

const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendSentiment {
    FullBear,
    Bearish,
    MildBear,
    Neutral,
    MildBull,
    Bullish,
    FullBull,
}

impl TrendSentiment {
    pub fn from_score(score: f64) -> Self {
        if score == 0.0 || score.is_nan() {
            TrendSentiment::Neutral
        } else if score <= -0.75 {
            TrendSentiment::FullBear
        } else if score < -0.25 {
            TrendSentiment::Bearish
        } else if score < 0.0 {
            TrendSentiment::MildBear
        } else if score < 0.25 {
            TrendSentiment::MildBull
        } else if score < 0.75 {
            TrendSentiment::Bullish
        } else {
            TrendSentiment::FullBull
        }
    }

    pub fn bias(self) -> Bias {
        match self {
            TrendSentiment::FullBear | TrendSentiment::Bearish | TrendSentiment::MildBear => {
                Bias::Bear
            }
            TrendSentiment::Neutral => Bias::Neutral,
            TrendSentiment::MildBull | TrendSentiment::Bullish | TrendSentiment::FullBull => {
                Bias::Bull
            }
        }
    }

    pub fn is_bullish(self) -> bool {
        self.bias() == Bias::Bull
    }

    pub fn is_bearish(self) -> bool {
        self.bias() == Bias::Bear
    }

    pub fn is_same_sentiment(self, other: TrendSentiment) -> bool {
        self.bias() == other.bias()
    }
}

impl fmt::Display for TrendSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendSentiment::FullBear => "Full Bear",
            TrendSentiment::Bearish => "Bearish",
            TrendSentiment::MildBear => "Mild Bear",
            TrendSentiment::Neutral => "Neutral",
            TrendSentiment::MildBull => "Mild Bull",
            TrendSentiment::Bullish => "Bullish",
            TrendSentiment::FullBull => "Full Bull",
        };
        f.write_str(s)
    }
}

/// Directional family of a sentiment; what patterns predict and require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bias {
    Bull,
    Bear,
    Neutral,
}

impl Bias {
    pub fn opposite(self) -> Self {
        match self {
            Bias::Bull => Bias::Bear,
            Bias::Bear => Bias::Bull,
            Bias::Neutral => Bias::Neutral,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Bias::Bull => 1.0,
            Bias::Bear => -1.0,
            Bias::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bias::Bull => "Bull",
            Bias::Bear => "Bear",
            Bias::Neutral => "Neutral",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendValue {
    pub score: f64,
    pub sentiment: TrendSentiment,
}

impl TrendValue {
    pub fn new(score: f64) -> Self {
        let score = clamp_unit(score);
        Self {
            score,
            sentiment: TrendSentiment::from_score(score),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrendType {
    Extreme,
    PriceToMa(usize),
    MultipleMa(Vec<usize>),
    Candlestick,
    Crossover(MovingAverageKey),
    Composite,
}

impl fmt::Display for TrendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendType::Extreme => write!(f, "Extreme"),
            TrendType::PriceToMa(period) => write!(f, "PriceToMa{}", period),
            TrendType::MultipleMa(periods) => {
                let list: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
                write!(f, "MultipleMa({})", list.join(","))
            }
            TrendType::Candlestick => write!(f, "Candlestick"),
            TrendType::Crossover(key) => write!(f, "{}", key),
            TrendType::Composite => write!(f, "Default"),
        }
    }
}

impl FromStr for TrendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_lowercase();
        if lower == "extreme" {
            return Ok(TrendType::Extreme);
        }
        if lower == "candlestick" {
            return Ok(TrendType::Candlestick);
        }
        if lower == "default" || lower == "composite" {
            return Ok(TrendType::Composite);
        }
        if let Some(period) = lower.strip_prefix("pricetoma") {
            let period: usize = period
                .trim()
                .parse()
                .map_err(|_| format!("invalid period in trend {trimmed}"))?;
            if period < 2 {
                return Err(format!("period must be at least 2 in trend {trimmed}"));
            }
            return Ok(TrendType::PriceToMa(period));
        }
        if let Some(rest) = lower.strip_prefix("multiplema") {
            let inner = rest.trim().trim_start_matches('(').trim_end_matches(')');
            if inner.is_empty() {
                return Ok(TrendType::MultipleMa(COMPOSITE_PERIODS.to_vec()));
            }
            let periods = inner
                .split(',')
                .map(|p| p.trim().parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| format!("invalid periods in trend {trimmed}"))?;
            return Ok(TrendType::MultipleMa(periods));
        }
        trimmed
            .parse::<MovingAverageKey>()
            .map(TrendType::Crossover)
            .map_err(|_| format!("unknown trend: {trimmed}"))
    }
}

/// One score per bar for a single trend indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSeries {
    pub trend_type: TrendType,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct WeightedTrend {
    pub series: TrendSeries,
    pub weight: f64,
}

/// A configured trend ingredient. `weight` is only consulted when several
/// specs are combined; a missing weight counts as 1.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSpec {
    pub trend: TrendType,
    pub weight: Option<f64>,
}

pub fn calculate(trend_type: &TrendType, bars: &[PriceBar]) -> Result<TrendSeries, SigbenchError> {
    let series = match trend_type {
        TrendType::Extreme => extreme::calculate_extreme(bars, DEFAULT_LOOKBACK),
        TrendType::PriceToMa(period) => price_to_ma::calculate_price_to_ma(bars, *period),
        TrendType::MultipleMa(periods) => multi_ma::calculate_multi_ma(bars, periods)?,
        TrendType::Candlestick => candlestick::calculate_candlestick(
            bars,
            DEFAULT_LOOKBACK,
            &candlestick::CandlestickWeights::default(),
        )?,
        TrendType::Crossover(key) => crossover::calculate_crossover(bars, *key),
        TrendType::Composite => composite(bars)?,
    };
    Ok(series)
}

/// Weighted sum of equally long series whose weights total 1.
pub fn combine(trends: &[WeightedTrend]) -> Result<Vec<f64>, SigbenchError> {
    let first = trends.first().ok_or_else(|| SigbenchError::TrendConfig {
        reason: "at least one trend is required".into(),
    })?;
    let len = first.series.values.len();
    if let Some(bad) = trends.iter().find(|t| t.series.values.len() != len) {
        return Err(SigbenchError::TrendConfig {
            reason: format!(
                "trend {} has {} values, expected {}",
                bad.series.trend_type,
                bad.series.values.len(),
                len
            ),
        });
    }
    let total: f64 = trends.iter().map(|t| t.weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(SigbenchError::TrendConfig {
            reason: format!("trend weights sum to {total}, expected 1"),
        });
    }

    let mut out = vec![0.0; len];
    for trend in trends {
        for (acc, v) in out.iter_mut().zip(&trend.series.values) {
            *acc += trend.weight * v;
        }
    }
    Ok(out.into_iter().map(clamp_unit).collect())
}

/// The fixed six-part composite.
pub fn composite(bars: &[PriceBar]) -> Result<TrendSeries, SigbenchError> {
    let mut parts = Vec::with_capacity(COMPOSITE_WEIGHTS.len());
    parts.push(extreme::calculate_extreme(bars, DEFAULT_LOOKBACK));
    for period in COMPOSITE_PERIODS {
        parts.push(price_to_ma::calculate_price_to_ma(bars, period));
    }
    parts.push(multi_ma::calculate_multi_ma(bars, &COMPOSITE_PERIODS)?);
    parts.push(candlestick::calculate_candlestick(
        bars,
        DEFAULT_LOOKBACK,
        &candlestick::CandlestickWeights::default(),
    )?);

    let weighted: Vec<WeightedTrend> = parts
        .into_iter()
        .zip(COMPOSITE_WEIGHTS)
        .map(|(series, weight)| WeightedTrend { series, weight })
        .collect();

    Ok(TrendSeries {
        trend_type: TrendType::Composite,
        values: combine(&weighted)?,
    })
}

/// Resolves configured specs into per-bar trend values. No specs means the
/// default composite.
pub fn build(specs: &[TrendSpec], bars: &[PriceBar]) -> Result<Vec<TrendValue>, SigbenchError> {
    let scores = match specs {
        [] => composite(bars)?.values,
        [single] => calculate(&single.trend, bars)?.values,
        many => {
            let weighted = many
                .iter()
                .map(|spec| {
                    Ok(WeightedTrend {
                        series: calculate(&spec.trend, bars)?,
                        weight: spec.weight.unwrap_or(1.0),
                    })
                })
                .collect::<Result<Vec<_>, SigbenchError>>()?;
            combine(&weighted)?
        }
    };
    Ok(scores.into_iter().map(TrendValue::new).collect())
}

/// Checks a spec list without computing anything, so a bad weight set is
/// reported before any bars are fetched.
pub fn check_specs(specs: &[TrendSpec]) -> Result<(), SigbenchError> {
    for spec in specs {
        if let TrendType::MultipleMa(periods) = &spec.trend {
            let mut distinct: Vec<usize> = periods.iter().copied().filter(|p| *p > 0).collect();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                return Err(SigbenchError::TrendConfig {
                    reason: format!("{} needs at least two distinct periods", spec.trend),
                });
            }
        }
    }
    if specs.len() > 1 {
        let total: f64 = specs.iter().map(|s| s.weight.unwrap_or(1.0)).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SigbenchError::TrendConfig {
                reason: format!("trend weights sum to {total}, expected 1"),
            });
        }
    }
    Ok(())
}

pub(crate) fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) }
}

/// (2/π)·atan(k·x), mapping the real line onto (-1, 1).
pub(crate) fn atan_normalize(x: f64, k: f64) -> f64 {
    (2.0 / PI) * (k * x).atan()
}

/// Least-squares slope of `ys` against 0..n.
pub(crate) fn regression_slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    if ys.len() < 2 {
        return 0.0;
    }
    let (mut sx, mut sy, mut sxy, mut sx2) = (0.0, 0.0, 0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let x = i as f64;
        sx += x;
        sy += y;
        sxy += x * y;
        sx2 += x * x;
    }
    let denom = n * sx2 - sx * sx;
    if denom == 0.0 {
        0.0
    } else {
        (n * sxy - sx * sy) / denom
    }
}

pub(crate) fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    var.sqrt()
}

/// Current volume over the trailing average (window ends at `index`),
/// clamped to [0.5, 2.0]. A zero average yields 1.
pub(crate) fn volume_factor(bars: &[PriceBar], index: usize, lookback: usize) -> f64 {
    let start = (index + 1).saturating_sub(lookback.max(1));
    let window = &bars[start..=index];
    let avg = window.iter().map(|b| b.volume as f64).sum::<f64>() / window.len() as f64;
    if avg <= 0.0 {
        return 1.0;
    }
    (bars[index].volume as f64 / avg).clamp(0.5, 2.0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ohlcv::PriceBar;
    use chrono::NaiveDate;

    pub fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: i64) -> PriceBar {
        PriceBar {
            source: "asx".into(),
            code: "TEST".into(),
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume,
            factor: 1.0,
        }
    }

    /// Steadily rising closes with constant volume.
    pub fn rising(count: usize) -> Vec<PriceBar> {
        (0..count)
            .map(|i| {
                let c = 100.0 + i as f64;
                bar(i, c - 0.5, c + 1.0, c - 1.0, c, 1000)
            })
            .collect()
    }

    pub fn falling(count: usize) -> Vec<PriceBar> {
        (0..count)
            .map(|i| {
                let c = 500.0 - i as f64;
                bar(i, c + 0.5, c + 1.0, c - 1.0, c, 1000)
            })
            .collect()
    }

    /// Oscillating closes with varying volume.
    pub fn wavy(count: usize) -> Vec<PriceBar> {
        (0..count)
            .map(|i| {
                let c = 100.0 + 10.0 * ((i as f64) / 7.0).sin();
                let o = c + ((i % 3) as f64 - 1.0);
                let v = 1000 + ((i * 37) % 900) as i64;
                bar(i, o, c.max(o) + 1.5, c.min(o) - 1.5, c, v)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(TrendSentiment::from_score(0.0), TrendSentiment::Neutral);
        assert_eq!(TrendSentiment::from_score(-1.0), TrendSentiment::FullBear);
        assert_eq!(TrendSentiment::from_score(-0.75), TrendSentiment::FullBear);
        assert_eq!(TrendSentiment::from_score(-0.5), TrendSentiment::Bearish);
        assert_eq!(TrendSentiment::from_score(-0.25), TrendSentiment::MildBear);
        assert_eq!(TrendSentiment::from_score(-0.01), TrendSentiment::MildBear);
        assert_eq!(TrendSentiment::from_score(0.01), TrendSentiment::MildBull);
        assert_eq!(TrendSentiment::from_score(0.25), TrendSentiment::Bullish);
        assert_eq!(TrendSentiment::from_score(0.75), TrendSentiment::FullBull);
        assert_eq!(TrendSentiment::from_score(1.0), TrendSentiment::FullBull);
    }

    #[test]
    fn sentiment_families() {
        assert!(TrendSentiment::MildBull.is_bullish());
        assert!(TrendSentiment::FullBear.is_bearish());
        assert!(TrendSentiment::Bullish.is_same_sentiment(TrendSentiment::FullBull));
        assert!(!TrendSentiment::Neutral.is_same_sentiment(TrendSentiment::MildBear));
        assert_eq!(Bias::Bull.opposite(), Bias::Bear);
    }

    #[test]
    fn trend_type_parse() {
        assert_eq!("Extreme".parse::<TrendType>().unwrap(), TrendType::Extreme);
        assert_eq!("PriceToMa21".parse::<TrendType>().unwrap(), TrendType::PriceToMa(21));
        assert_eq!(
            "MultipleMa(10,20)".parse::<TrendType>().unwrap(),
            TrendType::MultipleMa(vec![10, 20])
        );
        assert_eq!(
            "MultipleMa".parse::<TrendType>().unwrap(),
            TrendType::MultipleMa(vec![21, 50, 200])
        );
        assert_eq!(
            "S50C".parse::<TrendType>().unwrap(),
            TrendType::Crossover(MovingAverageKey::simple(50))
        );
        assert_eq!("default".parse::<TrendType>().unwrap(), TrendType::Composite);
        assert!("Nonsense".parse::<TrendType>().is_err());
    }

    #[test]
    fn combine_rejects_bad_weights() {
        let series = TrendSeries {
            trend_type: TrendType::Extreme,
            values: vec![0.5, 0.5],
        };
        let trends = vec![
            WeightedTrend {
                series: series.clone(),
                weight: 0.5,
            },
            WeightedTrend {
                series,
                weight: 0.4,
            },
        ];
        assert!(matches!(
            combine(&trends),
            Err(SigbenchError::TrendConfig { .. })
        ));
    }

    #[test]
    fn check_specs_catches_weights_and_periods() {
        let spec = |trend: TrendType, weight| TrendSpec { trend, weight };
        assert!(check_specs(&[]).is_ok());
        assert!(check_specs(&[spec(TrendType::Extreme, None)]).is_ok());
        assert!(check_specs(&[
            spec(TrendType::Extreme, Some(0.25)),
            spec(TrendType::Candlestick, Some(0.75)),
        ])
        .is_ok());
        assert!(matches!(
            check_specs(&[spec(TrendType::Extreme, None), spec(TrendType::Candlestick, None)]),
            Err(SigbenchError::TrendConfig { .. })
        ));
        assert!(matches!(
            check_specs(&[spec(TrendType::MultipleMa(vec![10, 10]), None)]),
            Err(SigbenchError::TrendConfig { .. })
        ));
    }

    #[test]
    fn combine_rejects_length_mismatch() {
        let trends = vec![
            WeightedTrend {
                series: TrendSeries {
                    trend_type: TrendType::Extreme,
                    values: vec![0.5, 0.5],
                },
                weight: 0.5,
            },
            WeightedTrend {
                series: TrendSeries {
                    trend_type: TrendType::Candlestick,
                    values: vec![0.5],
                },
                weight: 0.5,
            },
        ];
        assert!(matches!(
            combine(&trends),
            Err(SigbenchError::TrendConfig { .. })
        ));
    }

    #[test]
    fn combine_weighted_sum() {
        let trends = vec![
            WeightedTrend {
                series: TrendSeries {
                    trend_type: TrendType::Extreme,
                    values: vec![1.0, -1.0],
                },
                weight: 0.75,
            },
            WeightedTrend {
                series: TrendSeries {
                    trend_type: TrendType::Candlestick,
                    values: vec![-1.0, 0.0],
                },
                weight: 0.25,
            },
        ];
        let out = combine(&trends).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!((out[1] + 0.75).abs() < 1e-12);
    }

    #[test]
    fn composite_weights_sum_to_one() {
        let total: f64 = COMPOSITE_WEIGHTS.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn composite_length_matches_bars() {
        let bars = wavy(260);
        let series = composite(&bars).unwrap();
        assert_eq!(series.values.len(), bars.len());
        assert!(series.values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn composite_leans_with_the_trend() {
        let up = composite(&rising(300)).unwrap();
        let down = composite(&falling(300)).unwrap();
        assert!(up.values[299] > 0.2);
        assert!(down.values[299] < -0.2);
    }

    #[test]
    fn build_single_and_default() {
        let bars = rising(60);
        let values = build(&[], &bars).unwrap();
        assert_eq!(values.len(), 60);
        let single = build(
            &[TrendSpec {
                trend: TrendType::Extreme,
                weight: Some(0.2),
            }],
            &bars,
        )
        .unwrap();
        assert_eq!(single.len(), 60);
    }

    #[test]
    fn build_rejects_unweighted_pair() {
        let bars = rising(60);
        let specs = vec![
            TrendSpec {
                trend: TrendType::Extreme,
                weight: None,
            },
            TrendSpec {
                trend: TrendType::Candlestick,
                weight: None,
            },
        ];
        assert!(matches!(
            build(&specs, &bars),
            Err(SigbenchError::TrendConfig { .. })
        ));
    }

    #[test]
    fn regression_slope_of_line() {
        assert!((regression_slope(&[1.0, 3.0, 5.0, 7.0]) - 2.0).abs() < 1e-12);
        assert_eq!(regression_slope(&[4.0]), 0.0);
    }

    #[test]
    fn volume_factor_is_clamped() {
        let mut bars = rising(5);
        bars[4].volume = 100_000;
        assert!((volume_factor(&bars, 4, 5) - 2.0).abs() < 1e-12);
        bars[4].volume = 0;
        assert!((volume_factor(&bars, 4, 5) - 0.5).abs() < 1e-12);
        assert!((volume_factor(&bars, 2, 5) - 1.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn bucketing_is_total(score in -1.0f64..=1.0) {
            let s = TrendSentiment::from_score(score);
            let expected = if score == 0.0 {
                TrendSentiment::Neutral
            } else if score <= -0.75 {
                TrendSentiment::FullBear
            } else if score < -0.25 {
                TrendSentiment::Bearish
            } else if score < 0.0 {
                TrendSentiment::MildBear
            } else if score < 0.25 {
                TrendSentiment::MildBull
            } else if score < 0.75 {
                TrendSentiment::Bullish
            } else {
                TrendSentiment::FullBull
            };
            prop_assert_eq!(s, expected);
            prop_assert_eq!(score == 0.0, s == TrendSentiment::Neutral);
        }

        #[test]
        fn composite_of_bounded_inputs_is_bounded(
            raw in prop::collection::vec(0.0f64..1.0, 6),
            a in prop::collection::vec(-1.0f64..=1.0, 8),
            b in prop::collection::vec(-1.0f64..=1.0, 8),
        ) {
            let total: f64 = raw.iter().sum::<f64>().max(1e-6);
            let mut weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
            let drift: f64 = 1.0 - weights.iter().sum::<f64>();
            weights[0] += drift;
            let trends: Vec<WeightedTrend> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| WeightedTrend {
                    series: TrendSeries {
                        trend_type: TrendType::PriceToMa(i + 2),
                        values: if i % 2 == 0 { a.clone() } else { b.clone() },
                    },
                    weight: *w,
                })
                .collect();
            let out = combine(&trends).unwrap();
            prop_assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
