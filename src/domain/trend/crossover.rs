//! Price-versus-moving-average crossover trend for one moving-average key.
//!
//! Bullish (+1) when the keyed price has held above the average for two bars
//! or the whole bar trades above it; bearish (-1) for the mirror case; any
//! other bar carries the previous direction forward. The direction is scaled
//! by the volume factor and clamped. Neutral until the average has a full
//! window.

use crate::domain::moving_average::{MovingAverage, MovingAverageKey};
use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{clamp_unit, volume_factor, TrendSeries, TrendType, DEFAULT_LOOKBACK};

pub fn calculate_crossover(bars: &[PriceBar], key: MovingAverageKey) -> TrendSeries {
    let ma = MovingAverage::compute(key, bars).values;
    let mut values = vec![0.0; bars.len()];
    let mut direction = 0.0_f64;

    for t in key.period.max(1)..bars.len() {
        let price = bars[t].price(key.point);
        let prev = bars[t - 1].price(key.point);
        if (price > ma[t] && prev > ma[t - 1]) || bars[t].low > ma[t] {
            direction = 1.0;
        } else if (price < ma[t] && prev < ma[t - 1]) || bars[t].high < ma[t] {
            direction = -1.0;
        }
        values[t] = clamp_unit(direction * volume_factor(bars, t, DEFAULT_LOOKBACK));
    }

    TrendSeries {
        trend_type: TrendType::Crossover(key),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::test_support::{bar, falling, rising};

    #[test]
    fn above_average_is_bullish() {
        let series = calculate_crossover(&rising(30), MovingAverageKey::simple(5));
        assert!(series.values[..5].iter().all(|v| *v == 0.0));
        assert_eq!(series.values[29], 1.0);
    }

    #[test]
    fn below_average_is_bearish() {
        let series = calculate_crossover(&falling(30), MovingAverageKey::simple(5));
        assert_eq!(series.values[29], -1.0);
    }

    #[test]
    fn single_cross_carries_previous() {
        let mut bars = rising(20);
        // one close dips under the average while the range straddles it
        let c = bars[15].close;
        bars[15] = bar(15, c, c + 1.0, c - 10.0, c - 5.0, 1000);
        let series = calculate_crossover(&bars, MovingAverageKey::simple(5));
        assert_eq!(series.values[15], 1.0);
    }

    #[test]
    fn low_volume_dampens_direction() {
        let mut bars = rising(30);
        bars[29].volume = 0;
        bars[5].volume = 5000;
        let series = calculate_crossover(&bars, MovingAverageKey::simple(5));
        assert!((series.values[29] - 0.5).abs() < 1e-12);
        // heavy volume cannot push past the bound
        assert_eq!(series.values[5], 1.0);
        assert_eq!(series.values[28], 1.0);
    }
}
