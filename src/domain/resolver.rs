//! Resolves a pattern match into the first target it reaches.

use crate::domain::backtest::OutcomeTargets;
use crate::domain::error::SigbenchError;
use crate::domain::ohlcv::{count_weekdays, PriceBar, PricePoint};
use crate::domain::pattern::scanner::PatternMatch;
use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceHit {
    pub date: NaiveDate,
    pub price_point: PricePoint,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("Up"),
            Direction::Down => f.write_str("Down"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Up" => Ok(Direction::Up),
            "Down" => Ok(Direction::Down),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// One resolved match. `winner` is `None` while neither target was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDetail {
    pub id: Uuid,
    pub backtest_id: Uuid,
    pub signal_name: String,
    pub code: String,
    pub industry: Option<String>,
    pub sector: Option<String>,
    pub entry: PriceHit,
    pub up: Option<PriceHit>,
    pub down: Option<PriceHit>,
    pub winner: Option<Direction>,
    pub trading_days: Option<i64>,
    pub calendar_days: Option<i64>,
}

impl ResultDetail {
    pub fn winning_hit(&self) -> Option<&PriceHit> {
        match self.winner? {
            Direction::Up => self.up.as_ref(),
            Direction::Down => self.down.as_ref(),
        }
    }
}

/// Earlier date wins; a same-day tie goes to the up target.
pub fn pick_winner(up: Option<&PriceHit>, down: Option<&PriceHit>) -> Option<Direction> {
    match (up, down) {
        (Some(u), Some(d)) if d.date < u.date => Some(Direction::Down),
        (Some(_), _) => Some(Direction::Up),
        (None, Some(_)) => Some(Direction::Down),
        (None, None) => None,
    }
}

fn first_hit(
    bars: &[PriceBar],
    point: PricePoint,
    reached: impl Fn(f64) -> bool,
) -> Option<PriceHit> {
    bars.iter().find_map(|bar| {
        let price = bar.price(point);
        reached(price).then_some(PriceHit {
            date: bar.date,
            price_point: point,
            price,
        })
    })
}

/// Enters at the start of the match's pattern window and scans forward from
/// the next bar for each target independently.
pub fn resolve(
    found: &PatternMatch,
    bars: &[PriceBar],
    backtest_id: Uuid,
    targets: &OutcomeTargets,
) -> Result<ResultDetail, SigbenchError> {
    let start = found.pattern.start;
    let entry_bar = bars.get(start).ok_or_else(|| SigbenchError::InvalidInput {
        reason: format!(
            "match for {} at position {start} is outside {} bars",
            found.code,
            bars.len()
        ),
    })?;

    let entry_price = entry_bar.price(targets.entry);
    let up_price = entry_price * (1.0 + targets.up.magnitude());
    let down_price = entry_price * (1.0 - targets.down.magnitude());
    let ahead = &bars[start + 1..];

    let up = first_hit(ahead, targets.up.price_point, |p| p >= up_price);
    let down = first_hit(ahead, targets.down.price_point, |p| p <= down_price);
    let winner = pick_winner(up.as_ref(), down.as_ref());

    let mut detail = ResultDetail {
        id: Uuid::new_v4(),
        backtest_id,
        signal_name: found.signal_name.clone(),
        code: found.code.clone(),
        industry: found.industry.clone(),
        sector: found.sector.clone(),
        entry: PriceHit {
            date: entry_bar.date,
            price_point: targets.entry,
            price: entry_price,
        },
        up,
        down,
        winner,
        trading_days: None,
        calendar_days: None,
    };
    if let Some(hit) = detail.winning_hit().copied() {
        detail.trading_days = Some(count_weekdays(entry_bar.date, hit.date));
        detail.calendar_days = Some((hit.date - entry_bar.date).num_days());
    }
    Ok(detail)
}
