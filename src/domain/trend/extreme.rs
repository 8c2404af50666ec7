//! Extreme trend: direction of the most recently confirmed swing point.
//!
//! A bar `j` is a swing high when its high is strictly above every other high
//! in `[j-k, j+k]`, and a swing low likewise for lows. The swing is only known
//! once bar `j+k` has printed, so it takes effect from that bar on.
//!
//! - latest confirmed swing is a low: +1 (price bounced, bullish)
//! - latest confirmed swing is a high: -1 (price rolled over, bearish)
//! - a bar that is both: the opposite of the sentiment in force before it,
//!   or neutral when there was none
//!
//! Warmup: scores are 0 until `lookback` bars exist.

use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{clamp_unit, volume_factor, TrendSeries, TrendType};

/// Bars on each side of a swing point.
pub const SWING_STRENGTH: usize = 5;

pub fn calculate_extreme(bars: &[PriceBar], lookback: usize) -> TrendSeries {
    let k = SWING_STRENGTH;
    let mut values = vec![0.0; bars.len()];
    let mut bias = 0.0_f64;

    for (t, value) in values.iter_mut().enumerate() {
        if t >= 2 * k {
            let j = t - k;
            let high = is_swing(bars, j, k, |b| b.high);
            let low = is_swing(bars, j, k, |b| -b.low);
            bias = match (high, low) {
                (true, true) => -bias,
                (true, false) => -1.0,
                (false, true) => 1.0,
                (false, false) => bias,
            };
        }
        if t < lookback {
            continue;
        }
        *value = clamp_unit(bias * volume_factor(bars, t, lookback));
    }

    TrendSeries {
        trend_type: TrendType::Extreme,
        values,
    }
}

fn is_swing(bars: &[PriceBar], j: usize, k: usize, key: impl Fn(&PriceBar) -> f64) -> bool {
    let centre = key(&bars[j]);
    (j - k..=j + k)
        .filter(|&i| i != j)
        .all(|i| key(&bars[i]) < centre)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trend::test_support::{bar, wavy};
    use proptest::prelude::*;

    fn flat(count: usize) -> Vec<PriceBar> {
        (0..count).map(|i| bar(i, 10.0, 11.0, 9.0, 10.0, 1000)).collect()
    }

    #[test]
    fn warmup_is_zero() {
        let series = calculate_extreme(&wavy(40), 20);
        assert!(series.values[..20].iter().all(|v| *v == 0.0));
        assert_eq!(series.trend_type, TrendType::Extreme);
    }

    #[test]
    fn swing_high_turns_bearish() {
        let mut bars = flat(40);
        bars[25].high = 20.0;
        let series = calculate_extreme(&bars, 20);
        assert_eq!(series.values[29], 0.0);
        assert_eq!(series.values[30], -1.0);
        assert_eq!(series.values[39], -1.0);
    }

    #[test]
    fn swing_low_turns_bullish() {
        let mut bars = flat(40);
        bars[25].low = 1.0;
        let series = calculate_extreme(&bars, 20);
        assert_eq!(series.values[30], 1.0);
    }

    #[test]
    fn simultaneous_extremes_flip_prior_sentiment() {
        let mut bars = flat(50);
        bars[22].low = 1.0;
        bars[35].high = 20.0;
        bars[35].low = 1.0;
        let series = calculate_extreme(&bars, 20);
        assert_eq!(series.values[27], 1.0);
        assert_eq!(series.values[40], -1.0);
    }

    #[test]
    fn simultaneous_extremes_without_prior_is_neutral() {
        let mut bars = flat(40);
        bars[25].high = 20.0;
        bars[25].low = 1.0;
        let series = calculate_extreme(&bars, 20);
        assert_eq!(series.values[30], 0.0);
    }

    #[test]
    fn low_volume_dampens_score() {
        let mut bars = flat(40);
        bars[25].low = 1.0;
        bars[35].volume = 0;
        let series = calculate_extreme(&bars, 20);
        assert!((series.values[35] - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn bounded(len in 0usize..120, lookback in 1usize..30) {
            let series = calculate_extreme(&wavy(len), lookback);
            prop_assert_eq!(series.values.len(), len);
            prop_assert!(series.values.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
