//! Price-to-moving-average trend for a single period `p`.
//!
//! Two parts, each squashed through `(2/π)·atan`:
//! - distance: `(close - SMA_p) / σ_p`, where σ_p is the population standard
//!   deviation of the last `p` closes (sign of the distance when σ_p is 0)
//! - slope: least-squares slope of the last 10 SMA values, as percent of the
//!   current SMA per bar
//!
//! Score = 0.5·distance + 0.5·slope, scaled by the volume factor and clamped.
//! Warmup: a score needs `p + SLOPE_WINDOW - 1` bars.

use crate::domain::moving_average::sma;
use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{
    atan_normalize, clamp_unit, population_std, regression_slope, volume_factor, TrendSeries,
    TrendType, DEFAULT_LOOKBACK,
};

pub const SLOPE_WINDOW: usize = 10;
const DISTANCE_K: f64 = 1.0;
const SLOPE_K: f64 = 1.0;
const DISTANCE_WEIGHT: f64 = 0.5;
const SLOPE_WEIGHT: f64 = 0.5;

pub fn calculate_price_to_ma(bars: &[PriceBar], period: usize) -> TrendSeries {
    let mut values = vec![0.0; bars.len()];
    let trend_type = TrendType::PriceToMa(period);
    if period < 2 || bars.len() < period + SLOPE_WINDOW - 1 {
        return TrendSeries { trend_type, values };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ma = sma(&closes, period);

    for t in (period + SLOPE_WINDOW - 2)..bars.len() {
        let mean = ma[t];
        let sigma = population_std(&closes[t + 1 - period..=t]);
        let diff = closes[t] - mean;
        let distance = if sigma == 0.0 {
            diff.signum() * f64::from(diff != 0.0)
        } else {
            atan_normalize(diff / sigma, DISTANCE_K)
        };

        let slope_pct = if mean == 0.0 {
            0.0
        } else {
            regression_slope(&ma[t + 1 - SLOPE_WINDOW..=t]) / mean * 100.0
        };
        let slope = atan_normalize(slope_pct, SLOPE_K);

        let score = DISTANCE_WEIGHT * distance + SLOPE_WEIGHT * slope;
        values[t] = clamp_unit(score * volume_factor(bars, t, DEFAULT_LOOKBACK));
    }

    TrendSeries { trend_type, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::test_support::{bar, falling, rising, wavy};
    use proptest::prelude::*;

    #[test]
    fn warmup_is_zero() {
        let series = calculate_price_to_ma(&rising(60), 21);
        assert!(series.values[..29].iter().all(|v| *v == 0.0));
        assert!(series.values[29] != 0.0);
    }

    #[test]
    fn rising_series_is_bullish() {
        let series = calculate_price_to_ma(&rising(80), 21);
        assert!(series.values[79] > 0.3);
    }

    #[test]
    fn falling_series_is_bearish() {
        let series = calculate_price_to_ma(&falling(80), 21);
        assert!(series.values[79] < -0.3);
    }

    #[test]
    fn constant_closes_are_neutral() {
        let bars: Vec<_> = (0..40).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0, 500)).collect();
        let series = calculate_price_to_ma(&bars, 10);
        assert!(series.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn too_few_bars() {
        let series = calculate_price_to_ma(&rising(20), 21);
        assert_eq!(series.values, vec![0.0; 20]);
    }

    proptest! {
        #[test]
        fn bounded(len in 0usize..150, period in 2usize..40) {
            let series = calculate_price_to_ma(&wavy(len), period);
            prop_assert_eq!(series.values.len(), len);
            prop_assert!(series.values.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
