//! Multiple-moving-average trend: spread between consecutive fast/slow SMAs.
//!
//! For each consecutive pair `(fast, slow)` of the sorted periods, the spread
//! `SMA_fast - SMA_slow` is z-scored against its own last 20 values and
//! squashed through `(2/π)·atan`. When the spread has no variance the pair
//! contributes the sign of the spread. Pair scores are averaged, scaled by the
//! volume factor, and clamped.

use crate::domain::error::SigbenchError;
use crate::domain::moving_average::sma;
use crate::domain::ohlcv::PriceBar;
use crate::domain::trend::{
    atan_normalize, clamp_unit, population_std, volume_factor, TrendSeries, TrendType,
    DEFAULT_LOOKBACK,
};

const SPREAD_WINDOW: usize = 20;
const SPREAD_K: f64 = 1.0;

pub fn calculate_multi_ma(bars: &[PriceBar], periods: &[usize]) -> Result<TrendSeries, SigbenchError> {
    let mut sorted = periods.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() < 2 || sorted[0] == 0 {
        return Err(SigbenchError::TrendConfig {
            reason: format!("multiple moving average trend needs two or more distinct positive periods, got {periods:?}"),
        });
    }

    let trend_type = TrendType::MultipleMa(sorted.clone());
    let mut values = vec![0.0; bars.len()];
    let slowest = sorted[sorted.len() - 1];
    let first_valid = slowest - 1 + SPREAD_WINDOW - 1;
    if bars.len() <= first_valid {
        return Ok(TrendSeries { trend_type, values });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let averages: Vec<Vec<f64>> = sorted.iter().map(|p| sma(&closes, *p)).collect();
    let spreads: Vec<Vec<f64>> = averages
        .windows(2)
        .map(|pair| pair[0].iter().zip(&pair[1]).map(|(f, s)| f - s).collect())
        .collect();

    for (t, value) in values.iter_mut().enumerate().skip(first_valid) {
        let total: f64 = spreads
            .iter()
            .map(|spread| {
                let window = &spread[t + 1 - SPREAD_WINDOW..=t];
                let std = population_std(window);
                let diff = spread[t];
                if std == 0.0 {
                    diff.signum() * f64::from(diff != 0.0)
                } else {
                    atan_normalize(diff / std, SPREAD_K)
                }
            })
            .sum();
        let score = total / spreads.len() as f64;
        *value = clamp_unit(score * volume_factor(bars, t, DEFAULT_LOOKBACK));
    }

    Ok(TrendSeries { trend_type, values })
}
