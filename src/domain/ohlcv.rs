//! Daily price bar and price point selection.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prices carry four decimal places once adjusted.
pub const PRICE_PRECISION: i32 = 4;

/// One trading period for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub source: String,
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub factor: f64,
}

impl PriceBar {
    /// (high + low) / 2
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// (open + high + low + close) / 4
    pub fn average_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    /// high - low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn price(&self, point: PricePoint) -> f64 {
        match point {
            PricePoint::Open => self.open,
            PricePoint::High => self.high,
            PricePoint::Low => self.low,
            PricePoint::Close => self.close,
            PricePoint::MidPoint => self.midpoint(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricePoint {
    Open,
    High,
    Low,
    Close,
    MidPoint,
}

impl PricePoint {
    /// Single-letter form used inside moving-average keys such as `S21C`.
    pub fn letter(self) -> char {
        match self {
            PricePoint::Open => 'O',
            PricePoint::High => 'H',
            PricePoint::Low => 'L',
            PricePoint::Close => 'C',
            PricePoint::MidPoint => 'M',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'O' => Some(PricePoint::Open),
            'H' => Some(PricePoint::High),
            'L' => Some(PricePoint::Low),
            'C' => Some(PricePoint::Close),
            'M' => Some(PricePoint::MidPoint),
            _ => None,
        }
    }
}

impl fmt::Display for PricePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PricePoint::Open => "Open",
            PricePoint::High => "High",
            PricePoint::Low => "Low",
            PricePoint::Close => "Close",
            PricePoint::MidPoint => "MidPoint",
        };
        f.write_str(s)
    }
}

impl FromStr for PricePoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(PricePoint::Open),
            "high" => Ok(PricePoint::High),
            "low" => Ok(PricePoint::Low),
            "close" => Ok(PricePoint::Close),
            "midpoint" | "mid point" | "mid" => Ok(PricePoint::MidPoint),
            other => Err(format!("unknown price point: {other}")),
        }
    }
}

pub fn round_price(value: f64) -> f64 {
    let scale = 10f64.powi(PRICE_PRECISION);
    (value * scale).round() / scale
}

/// Weekdays in `(start, end]`; Monday to Friday of the same week is 4.
pub fn count_weekdays(start: NaiveDate, end: NaiveDate) -> i64 {
    if end <= start {
        return 0;
    }
    let total = (end - start).num_days();
    let full_weeks = total / 7;
    let mut count = full_weeks * 5;
    let mut day = start + chrono::Duration::days(full_weeks * 7);
    while day < end {
        day = day.succ_opt().unwrap_or(end);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            count += 1;
        }
    }
    count
}
