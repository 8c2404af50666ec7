//! Candlestick trend: what each bar's own shape says, nudged by recent slope.
//!
//! The slope part is the least-squares slope of the last `lookback` closes as
//! percent of their mean per bar, squashed through `(2/π)·atan`.

use crate::domain::error::SigbenchError;
use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{
    atan_normalize, clamp_unit, regression_slope, volume_factor, TrendSeries, TrendType,
};

const SLOPE_K: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandlestickWeights {
    pub color: f64,
    pub wick: f64,
    pub pattern: f64,
    pub slope: f64,
}

impl Default for CandlestickWeights {
    fn default() -> Self {
        Self {
            color: 0.25,
            wick: 0.25,
            pattern: 0.25,
            slope: 0.25,
        }
    }
}

impl CandlestickWeights {
    fn validate(&self) -> Result<(), SigbenchError> {
        let total = self.color + self.wick + self.pattern + self.slope;
        if (total - 1.0).abs() > 1e-4 {
            return Err(SigbenchError::TrendConfig {
                reason: format!("candlestick weights sum to {total}, expected 1"),
            });
        }
        Ok(())
    }
}

pub fn calculate_candlestick(
    bars: &[PriceBar],
    lookback: usize,
    weights: &CandlestickWeights,
) -> Result<TrendSeries, SigbenchError> {
    weights.validate()?;
    let lookback = lookback.max(2);
    let mut values = vec![0.0; bars.len()];

    for (t, value) in values.iter_mut().enumerate().skip(lookback) {
        let bar = &bars[t];
        let color = if bar.is_light() {
            1.0
        } else if bar.is_dark() {
            -1.0
        } else {
            0.0
        };

        let upper = bar.upper_shadow().length();
        let lower = bar.lower_shadow().length();
        let wick = if upper > lower {
            -1.0
        } else if lower > upper {
            1.0
        } else {
            0.0
        };

        let closes: Vec<f64> = bars[t + 1 - lookback..=t].iter().map(|b| b.close).collect();
        let slope = atan_normalize(slope_percent(&closes), SLOPE_K);

        let score = weights.color * color
            + weights.wick * wick
            + weights.pattern * pattern_score(bar)
            + weights.slope * slope;
        *value = clamp_unit(score * volume_factor(bars, t, lookback));
    }

    Ok(TrendSeries {
        trend_type: TrendType::Candlestick,
        values,
    })
}

fn slope_percent(closes: &[f64]) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    let mean = closes.iter().sum::<f64>() / closes.len() as f64;
    if mean == 0.0 {
        0.0
    } else {
        regression_slope(closes) / mean * 100.0
    }
}

fn pattern_score(bar: &PriceBar) -> f64 {
    if bar.is_bullish_marubozu() {
        1.0
    } else if bar.is_bearish_marubozu() {
        -1.0
    } else if bar.is_bullish_belthold() {
        0.8
    } else if bar.is_bearish_belthold() {
        -0.8
    } else if bar.is_dragonfly_doji() {
        0.5
    } else if bar.is_gravestone_doji() {
        -0.5
    } else if bar.is_umbrella() {
        0.6
    } else if bar.is_inverted_umbrella() {
        -0.6
    } else {
        // plain doji, spinning top and everything else
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::test_support::{bar, falling, rising, wavy};
    use proptest::prelude::*;

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let weights = CandlestickWeights {
            color: 0.5,
            ..CandlestickWeights::default()
        };
        assert!(matches!(
            calculate_candlestick(&rising(30), 20, &weights),
            Err(SigbenchError::TrendConfig { .. })
        ));
    }

    // closes 106..=125 around bar 25: slope 1 per bar on a mean of 115.5
    fn rising_slope() -> f64 {
        atan_normalize(100.0 / 115.5, SLOPE_K)
    }

    #[test]
    fn rising_and_falling_components() {
        // light body and longer upper wick cancel; no pattern; slope is left
        let up = calculate_candlestick(&rising(30), 20, &CandlestickWeights::default()).unwrap();
        assert!((up.values[25] - 0.25 * rising_slope()).abs() < 1e-12);
        // closes 494..=475: slope -1 on a mean of 484.5
        let down = calculate_candlestick(&falling(30), 20, &CandlestickWeights::default()).unwrap();
        let slope = atan_normalize(-100.0 / 484.5, SLOPE_K);
        assert!((down.values[25] - 0.25 * slope).abs() < 1e-12);
    }

    #[test]
    fn marubozu_scores_fully() {
        let mut bars = rising(30);
        let c = bars[25].close;
        bars[25] = bar(25, c - 2.0, c, c - 2.0, c, 1000);
        let series = calculate_candlestick(&bars, 20, &CandlestickWeights::default()).unwrap();
        // color +1, wick 0, pattern +1
        assert!((series.values[25] - (0.5 + 0.25 * rising_slope())).abs() < 1e-12);
    }

    #[test]
    fn steeper_slope_scores_higher() {
        let steep: Vec<PriceBar> = (0..30)
            .map(|i| {
                let c = 100.0 + 3.0 * i as f64;
                bar(i, c - 0.5, c + 1.0, c - 1.0, c, 1000)
            })
            .collect();
        let weights = CandlestickWeights::default();
        let gentle = calculate_candlestick(&rising(30), 20, &weights).unwrap();
        let steep = calculate_candlestick(&steep, 20, &weights).unwrap();
        assert!(steep.values[25] > gentle.values[25]);
        assert!(steep.values[25] < 0.25);
    }

    #[test]
    fn flat_closes_have_no_slope() {
        assert_eq!(slope_percent(&[10.0; 20]), 0.0);
        assert_eq!(slope_percent(&[0.0; 20]), 0.0);
        assert_eq!(slope_percent(&[]), 0.0);
    }

    #[test]
    fn warmup_is_zero() {
        let series = calculate_candlestick(&rising(30), 20, &CandlestickWeights::default()).unwrap();
        assert!(series.values[..20].iter().all(|v| *v == 0.0));
    }

    proptest! {
        #[test]
        fn bounded(len in 0usize..120, lookback in 0usize..30) {
            let series = calculate_candlestick(&wavy(len), lookback, &CandlestickWeights::default()).unwrap();
            prop_assert_eq!(series.values.len(), len);
            prop_assert!(series.values.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
