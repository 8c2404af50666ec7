//! Reversal and continuation predicates.
//!
//! Every predicate receives the first bar of its window as `position`. The
//! prologue is the `lookback` bars before the key bar; "bullish prologue"
//! means price rose into the key bar (every prologue high below it) while the
//! trend reads bullish, and "bearish prologue" the mirror.

use crate::domain::chart::Chart;
use crate::domain::ohlcv::PriceBar;
use crate::domain::pattern::PatternArgs;
use crate::domain::trend::TrendSentiment;

/// Harami mother candles must stand this far above the average body.
const HARAMI_TOLERANCE: f64 = 1.2;
const PRICE_EPSILON: f64 = 1e-9;

fn bar(chart: &Chart, i: usize) -> &PriceBar {
    &chart.bars()[i]
}

fn same_price(a: f64, b: f64) -> bool {
    (a - b).abs() < PRICE_EPSILON
}

fn heavier(later: &PriceBar, earlier: &PriceBar, volume_factor: f64) -> bool {
    later.volume as f64 > earlier.volume as f64 * volume_factor
}

fn prologue_is_bullish(chart: &Chart, key: usize, args: &PatternArgs) -> bool {
    chart.lookback_sentiment(key, args.lookback) == TrendSentiment::Bullish
        && chart.trend()[key].sentiment.is_bullish()
}

fn prologue_is_bearish(chart: &Chart, key: usize, args: &PatternArgs) -> bool {
    chart.lookback_sentiment(key, args.lookback) == TrendSentiment::Bearish
        && chart.trend()[key].sentiment.is_bearish()
}

fn prologue_body_average(chart: &Chart, key: usize, lookback: usize) -> f64 {
    let prologue = &chart.bars()[key.saturating_sub(lookback)..key];
    if prologue.is_empty() {
        return 0.0;
    }
    prologue.iter().map(|b| b.body().length()).sum::<f64>() / prologue.len() as f64
}

pub fn tall_white_candle(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    second.is_light()
        && second.is_tall_body()
        && chart.is_tall(position + 1, 0, 1.0)
        && heavier(second, first, args.volume_factor)
}

fn engulfs(outer: &PriceBar, inner: &PriceBar) -> bool {
    outer.body().low < inner.body().low && outer.body().high > inner.body().high
}

fn bullish_engulfing_at(chart: &Chart, key: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, key);
    let second = bar(chart, key + 1);
    first.is_dark()
        && second.is_light()
        && engulfs(second, first)
        && heavier(second, first, args.volume_factor)
        && prologue_is_bearish(chart, key, args)
}

fn bearish_engulfing_at(chart: &Chart, key: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, key);
    let second = bar(chart, key + 1);
    first.is_light()
        && second.is_dark()
        && engulfs(second, first)
        && heavier(second, first, args.volume_factor)
        && prologue_is_bullish(chart, key, args)
}

pub fn bullish_engulfing(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bullish_engulfing_at(chart, position, args)
}

pub fn bearish_engulfing(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bearish_engulfing_at(chart, position, args)
}

/// The bar after the engulfing pair closes higher again.
pub fn bullish_engulfing_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let third = bar(chart, position + 2);
    bullish_engulfing_at(chart, position, args)
        && third.is_light()
        && third.close > bar(chart, position + 1).close
}

pub fn bearish_engulfing_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let third = bar(chart, position + 2);
    bearish_engulfing_at(chart, position, args)
        && third.is_dark()
        && third.close < bar(chart, position + 1).close
}

/// Four dark candles, then the engulfing pair.
pub fn bullish_engulfing_four_black(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    (position..position + 4).all(|i| bar(chart, i).is_dark())
        && bullish_engulfing_at(chart, position + 4, args)
}

pub fn bearish_engulfing_four_white(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    (position..position + 4).all(|i| bar(chart, i).is_light())
        && bearish_engulfing_at(chart, position + 4, args)
}

pub fn bullish_engulfing_tall(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bullish_engulfing_at(chart, position, args)
        && chart.is_tall(position, 0, 1.0)
        && chart.is_tall(position + 1, 0, 1.0)
}

pub fn bearish_engulfing_tall(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bearish_engulfing_at(chart, position, args)
        && chart.is_tall(position, 0, 1.0)
        && chart.is_tall(position + 1, 0, 1.0)
}

/// An umbrella after a decline.
pub fn bullish_hammer(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bar(chart, position).is_umbrella() && prologue_is_bearish(chart, position, args)
}

/// An umbrella after an advance, the hanging man.
pub fn bearish_hammer(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bar(chart, position).is_umbrella() && prologue_is_bullish(chart, position, args)
}

pub fn bullish_hammer_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let next = bar(chart, position + 1);
    bullish_hammer(chart, position, args)
        && next.is_light()
        && next.close > bar(chart, position).body().high
}

pub fn bearish_hammer_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let next = bar(chart, position + 1);
    bearish_hammer(chart, position, args)
        && next.is_dark()
        && next.close < bar(chart, position).body().low
}

pub fn dark_cloud_cover(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    first.is_light()
        && second.is_dark()
        && second.body().high > first.high
        && second.body().low < first.body().midpoint()
        && second.body().low >= first.body().low
        && first.body().length() > prologue_body_average(chart, position, args.lookback)
        && prologue_is_bullish(chart, position, args)
}

pub fn dark_cloud_cover_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let third = bar(chart, position + 2);
    dark_cloud_cover(chart, position, args)
        && third.is_dark()
        && third.close < bar(chart, position + 1).close
}

pub fn piercing(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    first.is_dark()
        && second.is_light()
        && second.body().low < first.low
        && second.body().high > first.body().midpoint()
        && second.body().high <= first.body().high
        && first.body().length() > prologue_body_average(chart, position, args.lookback)
        && prologue_is_bearish(chart, position, args)
}

pub fn piercing_follow_thru(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let third = bar(chart, position + 2);
    piercing(chart, position, args) && third.is_light() && third.close > bar(chart, position + 1).close
}

fn morning_star_base(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    let third = bar(chart, position + 2);
    first.is_dark()
        && first.body().length() > prologue_body_average(chart, position, args.lookback)
        && second.body().high < first.body().low
        && chart.is_tall(position, 0, 1.0)
        && third.is_light()
        && third.low > second.low
        && third.close > first.body().midpoint()
        && heavier(third, first, args.volume_factor)
        && heavier(third, second, args.volume_factor)
        && prologue_is_bearish(chart, position, args)
}

fn evening_star_base(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    let third = bar(chart, position + 2);
    first.is_light()
        && first.body().length() > prologue_body_average(chart, position, args.lookback)
        && second.body().low > first.body().high
        && chart.is_tall(position, 0, 1.0)
        && third.is_dark()
        && third.high < second.high
        && third.close < first.body().midpoint()
        && heavier(third, first, args.volume_factor)
        && heavier(third, second, args.volume_factor)
        && prologue_is_bullish(chart, position, args)
}

pub fn morning_star(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    morning_star_base(chart, position, args)
        && chart.is_short(position + 1, 0, 1.0)
        && !bar(chart, position + 1).is_doji()
}

pub fn evening_star(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    evening_star_base(chart, position, args)
        && chart.is_short(position + 1, 0, 1.0)
        && !bar(chart, position + 1).is_doji()
}

pub fn morning_doji_star(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    morning_star_base(chart, position, args) && bar(chart, position + 1).is_doji()
}

pub fn evening_doji_star(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    evening_star_base(chart, position, args) && bar(chart, position + 1).is_doji()
}

fn inverted_shape(b: &PriceBar) -> bool {
    b.is_inverted_umbrella() || b.is_gravestone_doji()
}

pub fn shooting_star(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    inverted_shape(bar(chart, position)) && prologue_is_bullish(chart, position, args)
}

pub fn inverted_hammer(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    inverted_shape(bar(chart, position)) && prologue_is_bearish(chart, position, args)
}

/// Second body sits inside a tall first body.
fn harami_base(chart: &Chart, position: usize) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    chart.is_tall(position, 0, HARAMI_TOLERANCE)
        && second.body().high < first.body().high
        && second.body().low > first.body().low
}

pub fn bullish_harami(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    harami_base(chart, position)
        && chart.is_short(position + 1, 0, 1.0)
        && !bar(chart, position + 1).is_doji()
        && prologue_is_bearish(chart, position, args)
}

pub fn bearish_harami(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    harami_base(chart, position)
        && chart.is_short(position + 1, 0, 1.0)
        && !bar(chart, position + 1).is_doji()
        && prologue_is_bullish(chart, position, args)
}

pub fn bullish_harami_cross(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    harami_base(chart, position)
        && bar(chart, position + 1).is_doji()
        && prologue_is_bearish(chart, position, args)
}

pub fn bearish_harami_cross(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    harami_base(chart, position)
        && bar(chart, position + 1).is_doji()
        && prologue_is_bullish(chart, position, args)
}

pub fn tweezer_top(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    same_price(bar(chart, position).high, bar(chart, position + 1).high)
        && chart.is_tall(position, 0, 1.0)
        && chart.is_short(position + 1, 0, 1.0)
        && prologue_is_bullish(chart, position, args)
}

pub fn tweezer_bottom(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    same_price(bar(chart, position).low, bar(chart, position + 1).low)
        && chart.is_tall(position, 0, 1.0)
        && chart.is_short(position + 1, 0, 1.0)
        && prologue_is_bearish(chart, position, args)
}

pub fn bullish_belthold(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bar(chart, position).is_bullish_belthold()
        && chart.is_tall(position, 0, 1.0)
        && prologue_is_bearish(chart, position, args)
}

pub fn bearish_belthold(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    bar(chart, position).is_bearish_belthold()
        && chart.is_tall(position, 0, 1.0)
        && prologue_is_bullish(chart, position, args)
}

pub fn upside_gap_two_crows(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    let third = bar(chart, position + 2);
    first.is_light()
        && second.is_dark()
        && third.is_dark()
        && chart.is_tall(position, 0, 1.0)
        && second.body().low > first.body().high
        && third.body().high > second.body().high
        && third.body().low < first.body().high
        && prologue_is_bullish(chart, position, args)
}

pub fn three_black_crows(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    let third = bar(chart, position + 2);
    first.is_dark()
        && second.is_dark()
        && third.is_dark()
        && second.body().high < first.body().high
        && second.body().high > first.body().low
        && third.body().high < second.body().high
        && third.body().high > second.body().low
        && prologue_is_bullish(chart, position, args)
}

pub fn three_white_soldiers(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    let third = bar(chart, position + 2);
    first.is_light()
        && second.is_light()
        && third.is_light()
        && second.body().low > first.body().low
        && second.body().low < first.body().high
        && third.body().low > second.body().low
        && third.body().low < second.body().high
        && prologue_is_bearish(chart, position, args)
}

pub fn bullish_counterattack(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    first.is_dark()
        && chart.is_tall(position, 0, 1.0)
        && second.is_light()
        && same_price(first.close, second.close)
        && prologue_is_bearish(chart, position, args)
}

pub fn bearish_counterattack(chart: &Chart, position: usize, args: &PatternArgs) -> bool {
    let first = bar(chart, position);
    let second = bar(chart, position + 1);
    first.is_light()
        && chart.is_tall(position, 0, 1.0)
        && second.is_dark()
        && same_price(first.close, second.close)
        && prologue_is_bullish(chart, position, args)
}
