//! Split back-adjustment.
//!
//! Raw bars plus a split history become a continuous series: every bar that
//! precedes a split is divided by the cumulative factor of the splits still
//! ahead of it, and its volume multiplied by the same factor.

use crate::domain::ohlcv::{round_price, PriceBar};
use chrono::NaiveDate;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitEvent {
    pub source: String,
    pub code: String,
    pub date: NaiveDate,
    pub before: f64,
    pub after: f64,
}

impl SplitEvent {
    /// Parses ratio text such as `2/1` or `2:1` (after/before). Malformed text
    /// yields a 1:1 split so the event becomes a no-op.
    pub fn from_ratio_text(source: &str, code: &str, date: NaiveDate, text: &str) -> Self {
        let (after, before) = match parse_ratio(text) {
            Some(pair) => pair,
            None => {
                warn!(code, %date, ratio = text, "malformed split ratio, treating as 1:1");
                (1.0, 1.0)
            }
        };
        Self {
            source: source.to_string(),
            code: code.to_string(),
            date,
            before,
            after,
        }
    }

    /// after / before, or 1 when `before` is zero.
    pub fn ratio(&self) -> f64 {
        if self.before == 0.0 {
            1.0
        } else {
            self.after / self.before
        }
    }
}

fn parse_ratio(text: &str) -> Option<(f64, f64)> {
    let (a, b) = text.split_once(['/', ':'])?;
    let after: f64 = a.trim().parse().ok()?;
    let before: f64 = b.trim().parse().ok()?;
    if !after.is_finite() || !before.is_finite() || after < 0.0 || before < 0.0 {
        return None;
    }
    Some((after, before))
}

/// Produces one adjusted bar per raw bar, in the same order.
///
/// `raw` must be ascending by date. Only splits strictly between the first
/// and last bar dates participate.
pub fn adjust(raw: &[PriceBar], splits: &[SplitEvent]) -> Vec<PriceBar> {
    let (first, last) = match (raw.first(), raw.last()) {
        (Some(f), Some(l)) => (f.date, l.date),
        _ => return Vec::new(),
    };

    let mut qualifying: Vec<&SplitEvent> = splits
        .iter()
        .filter(|s| s.date > first && s.date < last)
        .collect();
    qualifying.sort_by_key(|s| s.date);

    if qualifying.is_empty() {
        return raw.iter().map(|b| with_factor(b, 1.0)).collect();
    }

    let mut cumulative = vec![1.0; qualifying.len()];
    let mut running = 1.0;
    for (i, split) in qualifying.iter().enumerate().rev() {
        running *= split.ratio();
        cumulative[i] = running;
    }

    let snaps = snap_to_bars(raw, &qualifying, &cumulative);

    let mut out = Vec::with_capacity(raw.len());
    let mut next = 0usize;
    for (i, bar) in raw.iter().enumerate() {
        while next < snaps.len() && snaps[next].0 <= i {
            next += 1;
        }
        let factor = snaps.get(next).map(|s| s.1).unwrap_or(1.0);
        out.push(with_factor(bar, factor));
    }
    out
}

/// Moves each split to the first bar dated on or after it. Splits landing on
/// the same bar collapse into one entry whose factor already includes all of
/// them (the earliest split's cumulative value).
fn snap_to_bars(
    raw: &[PriceBar],
    splits: &[&SplitEvent],
    cumulative: &[f64],
) -> Vec<(usize, f64)> {
    let mut snaps: Vec<(usize, f64)> = Vec::with_capacity(splits.len());
    for (split, factor) in splits.iter().zip(cumulative) {
        let idx = raw.partition_point(|b| b.date < split.date);
        if idx >= raw.len() {
            continue;
        }
        match snaps.last() {
            Some(&(prev, _)) if prev == idx => {}
            _ => snaps.push((idx, *factor)),
        }
    }
    snaps
}

fn with_factor(bar: &PriceBar, factor: f64) -> PriceBar {
    if factor == 1.0 {
        return PriceBar {
            factor: 1.0,
            ..bar.clone()
        };
    }
    PriceBar {
        open: round_price(bar.open / factor),
        high: round_price(bar.high / factor),
        low: round_price(bar.low / factor),
        close: round_price(bar.close / factor),
        volume: (bar.volume as f64 * factor).round() as i64,
        factor,
        ..bar.clone()
    }
}
